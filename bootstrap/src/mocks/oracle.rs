use super::{address, derive};
use crate::{
    identity::{CONFIG_KEY_PREFIX, OFF_CHAIN_KEY_PREFIX, P2P_PREFIX, SIGNING_ADDRESS_PREFIX},
    job::JobSpec,
    service::{OracleSpec, Service},
    CurrencyKey, Endpoint, Error, JobId, KeyBundle, OracleClient, P2pKey,
};
use commonware_runtime::Clock;
use commonware_utils::hex;
use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};
use x25519_dalek::{PublicKey, StaticSecret};

/// Port oracles serve their API on.
const API_PORT: u16 = 6688;

/// Port oracles accept peer-to-peer connections on.
const P2P_PORT: u16 = 6690;

/// Number of currency keys every oracle starts with.
const CURRENCY_KEYS: usize = 2;

struct State {
    spec: Option<OracleSpec>,
    currency_keys: Vec<CurrencyKey>,
    p2p_keys: Vec<P2pKey>,
    key_bundles: Vec<KeyBundle>,
    jobs: Vec<JobSpec>,
}

/// A simulated oracle node whose keys are derived from its name.
#[derive(Clone)]
pub struct Oracle<E: Clock> {
    context: E,
    name: String,
    ready_at: SystemTime,
    config_secret: StaticSecret,
    state: Arc<Mutex<State>>,
}

impl<E: Clock> Oracle<E> {
    /// Create an oracle that is ready immediately.
    pub fn new(context: E, name: &str) -> Self {
        let now = context.current();
        Self::starting(context, name, now, None)
    }

    pub(super) fn starting(
        context: E,
        name: &str,
        ready_at: SystemTime,
        spec: Option<OracleSpec>,
    ) -> Self {
        let config_secret = StaticSecret::from(derive(name, "config"));
        let currency_keys = (0..CURRENCY_KEYS)
            .map(|i| CurrencyKey {
                address: address(name, &format!("currency-{i}")).to_string(),
                balance: None,
            })
            .collect();
        let p2p_keys = vec![P2pKey {
            peer_id: format!("{P2P_PREFIX}12D3KooW{}", hex(&derive(name, "p2p")[..12])),
            public_key: hex(&derive(name, "p2p-key")),
        }];
        let key_bundles = vec![KeyBundle {
            id: hex(&derive(name, "bundle")),
            on_chain_signing_address: format!(
                "{SIGNING_ADDRESS_PREFIX}{}",
                address(name, "signer")
            ),
            off_chain_public_key: format!(
                "{OFF_CHAIN_KEY_PREFIX}{}",
                hex(&derive(name, "off-chain"))
            ),
            config_public_key: format!(
                "{CONFIG_KEY_PREFIX}{}",
                hex(PublicKey::from(&config_secret).as_bytes())
            ),
        }];
        Self {
            context,
            name: name.to_string(),
            ready_at,
            config_secret,
            state: Arc::new(Mutex::new(State {
                spec,
                currency_keys,
                p2p_keys,
                key_bundles,
                jobs: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the spec the oracle was provisioned with.
    pub fn spec(&self) -> Option<OracleSpec> {
        self.state.lock().unwrap().spec.clone()
    }

    /// Returns the (first) key bundle reported by the oracle.
    pub fn bundle(&self) -> KeyBundle {
        self.state.lock().unwrap().key_bundles[0].clone()
    }

    /// Returns the secret half of the oracle's config key.
    pub fn config_secret(&self) -> StaticSecret {
        self.config_secret.clone()
    }

    pub fn config_public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.config_secret).to_bytes()
    }

    /// Returns every job accepted by the oracle.
    pub fn jobs(&self) -> Vec<JobSpec> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn set_currency_keys(&self, keys: Vec<CurrencyKey>) {
        self.state.lock().unwrap().currency_keys = keys;
    }

    pub fn set_p2p_keys(&self, keys: Vec<P2pKey>) {
        self.state.lock().unwrap().p2p_keys = keys;
    }

    pub fn set_key_bundles(&self, bundles: Vec<KeyBundle>) {
        self.state.lock().unwrap().key_bundles = bundles;
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), Error> {
        if self.context.current() < self.ready_at {
            return Err(Error::transport(operation, &self.name, "connection refused"));
        }
        Ok(())
    }
}

impl<E: Clock> Service for Oracle<E> {
    type Spec = OracleSpec;

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), API_PORT)
    }

    async fn is_ready(&self) -> bool {
        self.ensure_ready("is_ready").is_ok()
    }
}

impl<E: Clock> OracleClient for Oracle<E> {
    fn p2p_port(&self) -> u16 {
        P2P_PORT
    }

    async fn currency_keys(&self) -> Result<Vec<CurrencyKey>, Error> {
        self.ensure_ready("currency_keys")?;
        Ok(self.state.lock().unwrap().currency_keys.clone())
    }

    async fn p2p_keys(&self) -> Result<Vec<P2pKey>, Error> {
        self.ensure_ready("p2p_keys")?;
        Ok(self.state.lock().unwrap().p2p_keys.clone())
    }

    async fn key_bundles(&self) -> Result<Vec<KeyBundle>, Error> {
        self.ensure_ready("key_bundles")?;
        Ok(self.state.lock().unwrap().key_bundles.clone())
    }

    async fn submit_job(&self, job: &JobSpec) -> Result<JobId, Error> {
        self.ensure_ready("submit_job")?;
        job.render()?;
        let mut state = self.state.lock().unwrap();
        state.jobs.push(job.clone());
        Ok(JobId(state.jobs.len().to_string()))
    }
}
