//! Client of an oracle node's HTTP API.
//!
//! The API authenticates with a session cookie obtained by posting the API user's credentials to
//! `/sessions`. Responses follow the JSON:API layout (`{"data": [{"id", "attributes"}]}`).

use crate::{runtime::probe, Error};
use reqwest::{RequestBuilder, Response, StatusCode};
use ocrnet_bootstrap::{
    job::JobSpec,
    service::{OracleSpec, Service},
    CurrencyKey, Endpoint, JobId, KeyBundle, OracleClient, P2pKey,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

#[derive(Deserialize)]
struct Document<T> {
    data: T,
}

#[derive(Deserialize)]
struct Resource<A> {
    #[serde(default)]
    id: String,
    attributes: A,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EthKey {
    address: String,
    #[serde(default)]
    eth_balance: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerKey {
    peer_id: String,
    #[serde(default)]
    public_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrKey {
    #[serde(default)]
    id: String,
    on_chain_signing_address: String,
    off_chain_public_key: String,
    config_public_key: String,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

fn currency_keys(document: Document<Vec<Resource<EthKey>>>) -> Vec<CurrencyKey> {
    document
        .data
        .into_iter()
        .map(|key| CurrencyKey {
            address: key.attributes.address,
            balance: key.attributes.eth_balance,
        })
        .collect()
}

fn p2p_keys(document: Document<Vec<Resource<PeerKey>>>) -> Vec<P2pKey> {
    document
        .data
        .into_iter()
        .map(|key| P2pKey {
            peer_id: key.attributes.peer_id,
            public_key: key.attributes.public_key,
        })
        .collect()
}

fn key_bundles(document: Document<Vec<Resource<OcrKey>>>) -> Vec<KeyBundle> {
    document
        .data
        .into_iter()
        .map(|bundle| {
            let attributes = bundle.attributes;
            let id = if attributes.id.is_empty() {
                bundle.id
            } else {
                attributes.id
            };
            KeyBundle {
                id,
                on_chain_signing_address: attributes.on_chain_signing_address,
                off_chain_public_key: attributes.off_chain_public_key,
                config_public_key: attributes.config_public_key,
            }
        })
        .collect()
}

/// An oracle node reached over its API.
#[derive(Clone)]
pub struct Node {
    name: String,
    endpoint: Endpoint,
    p2p_port: u16,
    email: String,
    password: String,
    client: reqwest::Client,
    authenticated: Arc<AtomicBool>,
}

impl Node {
    /// Create a client of the node at `endpoint`.
    ///
    /// `client` must keep cookies between requests.
    pub fn new(
        name: &str,
        endpoint: Endpoint,
        p2p_port: u16,
        email: &str,
        password: &str,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            endpoint,
            p2p_port,
            email: email.to_string(),
            password: password.to_string(),
            client,
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint.http())
    }

    /// Open a session (unless one is already open).
    async fn login(&self) -> Result<(), Error> {
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        let url = self.url("sessions");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        self.authenticated.store(true, Ordering::Release);
        debug!(oracle = %self.name, "opened session");
        Ok(())
    }

    /// Send the request built by `build` within a session.
    ///
    /// A request rejected as unauthorized (the session expired) is retried once with a new
    /// session.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, Error> {
        self.login().await?;
        let response = build().send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!(oracle = %self.name, "session expired");
        self.authenticated.store(false, Ordering::Release);
        self.login().await?;
        Ok(build().send().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path);
        let response = self.send(|| self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    fn transport(&self, operation: &'static str, err: Error) -> ocrnet_bootstrap::Error {
        ocrnet_bootstrap::Error::transport(operation, &self.name, err)
    }
}

impl Service for Node {
    type Spec = OracleSpec;

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn is_ready(&self) -> bool {
        probe(&self.endpoint).await
    }
}

impl OracleClient for Node {
    fn p2p_port(&self) -> u16 {
        self.p2p_port
    }

    async fn currency_keys(&self) -> Result<Vec<CurrencyKey>, ocrnet_bootstrap::Error> {
        self.get("v2/keys/eth")
            .await
            .map(currency_keys)
            .map_err(|err| self.transport("currency_keys", err))
    }

    async fn p2p_keys(&self) -> Result<Vec<P2pKey>, ocrnet_bootstrap::Error> {
        self.get("v2/keys/p2p")
            .await
            .map(p2p_keys)
            .map_err(|err| self.transport("p2p_keys", err))
    }

    async fn key_bundles(&self) -> Result<Vec<KeyBundle>, ocrnet_bootstrap::Error> {
        self.get("v2/keys/ocr")
            .await
            .map(key_bundles)
            .map_err(|err| self.transport("key_bundles", err))
    }

    async fn submit_job(&self, job: &JobSpec) -> Result<JobId, ocrnet_bootstrap::Error> {
        let toml = job.render()?;
        let submit = async {
            let url = self.url("v2/jobs");
            let body = json!({ "toml": toml });
            let response = self.send(|| self.client.post(&url).json(&body)).await?;
            if !response.status().is_success() {
                return Err(Error::Status {
                    status: response.status().as_u16(),
                    url,
                });
            }
            let created: Document<Created> = response.json().await?;
            Ok::<_, Error>(JobId(created.data.id))
        };
        submit.await.map_err(|err| self.transport("submit_job", err))
    }
}
