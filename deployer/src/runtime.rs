//! Resolve the services a bootstrap asks for to services that are already running.
//!
//! [Attached] does not start anything: each provisioning request is answered with a client of
//! the service configured under the requested name. The requested spec is only logged (the
//! configured services are expected to have been started with matching parameters).

use crate::{config::Config, oracle::Node, rpc::Geth, Error};
use ocrnet_bootstrap::{
    sequencer::Config as BootstrapConfig,
    service::{OracleSpec, PeerSpec, Provision, Service},
    Endpoint, OracleId,
};
use std::{collections::HashMap, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

/// How long to wait for a TCP connection before considering a service unreachable.
const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Returns true if a TCP connection to `endpoint` can be established.
pub async fn probe(endpoint: &Endpoint) -> bool {
    let address = (endpoint.host.as_str(), endpoint.port);
    matches!(
        timeout(DIAL_TIMEOUT, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// A database backing an oracle (only its reachability is checked).
#[derive(Clone, Debug)]
pub struct Database {
    endpoint: Endpoint,
}

impl Service for Database {
    type Spec = ();

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn is_ready(&self) -> bool {
        probe(&self.endpoint).await
    }
}

/// The price feed polled by oracle jobs.
#[derive(Clone)]
pub struct Feed {
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl Service for Feed {
    type Spec = ();

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn is_ready(&self) -> bool {
        match self.client.get(self.endpoint.http()).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(?err, "feed not ready");
                false
            }
        }
    }
}

/// Services of a network started outside of this process.
pub struct Attached {
    peers: HashMap<String, Geth>,
    databases: HashMap<String, Database>,
    oracles: HashMap<String, Node>,
    feed: (String, Feed),
}

impl Attached {
    /// Create clients of every service listed in `cfg`.
    ///
    /// Databases are matched to oracles by position.
    pub fn new(cfg: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build()?;
        let peers = cfg
            .peers
            .iter()
            .map(|peer| {
                let endpoint = Endpoint::new(&peer.host, peer.rpc_port);
                Ok((peer.name.clone(), Geth::new(&peer.name, endpoint)?))
            })
            .collect::<Result<_, Error>>()?;
        let databases = cfg
            .oracles
            .iter()
            .zip(&cfg.databases)
            .map(|(oracle, database)| {
                let name = BootstrapConfig::database(&OracleId::new(&oracle.name));
                let endpoint = Endpoint::new(&database.host, database.port);
                (name.to_string(), Database { endpoint })
            })
            .collect();
        let mut oracles = HashMap::new();
        for oracle in &cfg.oracles {
            // Each oracle holds its own session
            let session = reqwest::Client::builder().cookie_store(true).build()?;
            let node = Node::new(
                &oracle.name,
                Endpoint::new(&oracle.host, oracle.api_port),
                oracle.p2p_port,
                &oracle.email,
                &oracle.password,
                session,
            );
            oracles.insert(oracle.name.clone(), node);
        }
        let feed = Feed {
            endpoint: Endpoint::new(&cfg.feed.host, cfg.feed.port),
            client,
        };
        Ok(Self {
            peers,
            databases,
            oracles,
            feed: (cfg.feed.name.clone(), feed),
        })
    }
}

fn lookup<S: Clone>(
    services: &HashMap<String, S>,
    name: &str,
) -> Result<S, ocrnet_bootstrap::Error> {
    services
        .get(name)
        .cloned()
        .ok_or_else(|| ocrnet_bootstrap::Error::transport("provision", name, "not configured"))
}

impl Provision<Geth> for Attached {
    async fn provision(
        &self,
        name: &str,
        spec: PeerSpec,
    ) -> Result<Geth, ocrnet_bootstrap::Error> {
        debug!(peer = name, bootstrap = spec.bootstrap, "attaching to peer");
        lookup(&self.peers, name)
    }
}

impl Provision<Database> for Attached {
    async fn provision(&self, name: &str, _: ()) -> Result<Database, ocrnet_bootstrap::Error> {
        debug!(database = name, "attaching to database");
        lookup(&self.databases, name)
    }
}

impl Provision<Node> for Attached {
    async fn provision(
        &self,
        name: &str,
        spec: OracleSpec,
    ) -> Result<Node, ocrnet_bootstrap::Error> {
        debug!(
            oracle = name,
            database = %spec.database,
            chain = %spec.chain,
            token = %spec.token,
            "attaching to oracle"
        );
        lookup(&self.oracles, name)
    }
}

impl Provision<Feed> for Attached {
    async fn provision(&self, name: &str, _: ()) -> Result<Feed, ocrnet_bootstrap::Error> {
        let (configured, feed) = &self.feed;
        if configured != name {
            return Err(ocrnet_bootstrap::Error::transport(
                "provision",
                name,
                "not configured",
            ));
        }
        debug!(feed = name, "attaching to feed");
        Ok(feed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const CONFIG: &str = r#"
tag: local
funder: "0x8ea1441a74ffbe9504a8cb3f7e4b7118d8ccfc56"
peers:
  - { name: geth-0, host: 127.0.0.1, rpc_port: 8545 }
  - { name: geth-1, host: 127.0.0.1, rpc_port: 8546 }
databases:
  - { name: postgres-0, host: 127.0.0.1, port: 5432 }
  - { name: postgres-1, host: 127.0.0.1, port: 5433 }
oracles:
  - name: oracle-a
    host: 127.0.0.1
    api_port: 6688
    p2p_port: 6690
    email: a@ocr.net
    password: a
  - name: oracle-b
    host: 127.0.0.1
    api_port: 6689
    p2p_port: 6691
    email: b@ocr.net
    password: b
feed: { name: feed, host: 127.0.0.1, port: 8080 }
artifacts:
  token: token.hex
  access_controller: access_controller.hex
  aggregator: aggregator.hex
"#;

    #[tokio::test]
    async fn test_attached() {
        let cfg = Config::parse(CONFIG).unwrap();
        let attached = Attached::new(&cfg).unwrap();

        let peer = Provision::<Geth>::provision(&attached, "geth-1", PeerSpec { bootstrap: false })
            .await
            .unwrap();
        assert_eq!(peer.endpoint(), Endpoint::new("127.0.0.1", 8546));

        let database = Provision::<Database>::provision(&attached, "oracle-b-db", ())
            .await
            .unwrap();
        assert_eq!(database.endpoint(), Endpoint::new("127.0.0.1", 5433));

        let feed = Provision::<Feed>::provision(&attached, "feed", ())
            .await
            .unwrap();
        assert_eq!(feed.endpoint(), Endpoint::new("127.0.0.1", 8080));

        let missing =
            Provision::<Geth>::provision(&attached, "geth-2", PeerSpec { bootstrap: false }).await;
        assert!(missing.is_err());
        let missing = Provision::<Feed>::provision(&attached, "other", ()).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe(&Endpoint::new("127.0.0.1", port)).await);

        drop(listener);
        assert!(!probe(&Endpoint::new("127.0.0.1", port)).await);
    }
}
