use super::{ChainPeer, Oracle, World};
use crate::{
    service::{OracleSpec, PeerSpec, Provision, Service},
    Endpoint, Error,
};
use commonware_runtime::Clock;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};

/// A simulated database.
#[derive(Clone)]
pub struct Database<E: Clock> {
    context: E,
    name: String,
    ready_at: SystemTime,
}

impl<E: Clock> Service for Database<E> {
    type Spec = ();

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), 5432)
    }

    async fn is_ready(&self) -> bool {
        self.context.current() >= self.ready_at
    }
}

/// A simulated price feed.
#[derive(Clone)]
pub struct Feed<E: Clock> {
    context: E,
    name: String,
    ready_at: SystemTime,
}

impl<E: Clock> Service for Feed<E> {
    type Spec = ();

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), 8080)
    }

    async fn is_ready(&self) -> bool {
        self.context.current() >= self.ready_at
    }
}

/// A service provisioning request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    pub name: String,
    pub at: SystemTime,
}

/// Provisions simulated services in a [World].
#[derive(Clone)]
pub struct Runtime<E: Clock> {
    world: World<E>,
    oracles: Arc<Mutex<BTreeMap<String, Oracle<E>>>>,
    provisioned: Arc<Mutex<Vec<Provisioned>>>,
}

impl<E: Clock> Runtime<E> {
    pub fn new(world: World<E>) -> Self {
        Self {
            world,
            oracles: Arc::new(Mutex::new(BTreeMap::new())),
            provisioned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn world(&self) -> &World<E> {
        &self.world
    }

    /// Returns the oracle provisioned as `name`.
    pub fn oracle(&self, name: &str) -> Option<Oracle<E>> {
        self.oracles.lock().unwrap().get(name).cloned()
    }

    /// Returns every provisioning request, in the order received.
    pub fn provisioned(&self) -> Vec<Provisioned> {
        self.provisioned.lock().unwrap().clone()
    }

    /// Record a provisioning request and return the time the service becomes ready.
    fn record(&self, name: &str) -> SystemTime {
        let now = self.world.context().current();
        self.provisioned.lock().unwrap().push(Provisioned {
            name: name.to_string(),
            at: now,
        });
        now + self.world.config().startup_delay
    }
}

impl<E: Clock> Provision<ChainPeer<E>> for Runtime<E> {
    async fn provision(&self, name: &str, _: PeerSpec) -> Result<ChainPeer<E>, Error> {
        let ready_at = self.record(name);
        Ok(self.world.add_peer(name, ready_at))
    }
}

impl<E: Clock> Provision<Database<E>> for Runtime<E> {
    async fn provision(&self, name: &str, _: ()) -> Result<Database<E>, Error> {
        let ready_at = self.record(name);
        Ok(Database {
            context: self.world.context().clone(),
            name: name.to_string(),
            ready_at,
        })
    }
}

impl<E: Clock> Provision<Feed<E>> for Runtime<E> {
    async fn provision(&self, name: &str, _: ()) -> Result<Feed<E>, Error> {
        let ready_at = self.record(name);
        Ok(Feed {
            context: self.world.context().clone(),
            name: name.to_string(),
            ready_at,
        })
    }
}

impl<E: Clock> Provision<Oracle<E>> for Runtime<E> {
    async fn provision(&self, name: &str, spec: OracleSpec) -> Result<Oracle<E>, Error> {
        let ready_at = self.record(name);
        let oracle = Oracle::starting(self.world.context().clone(), name, ready_at, Some(spec));
        self.oracles
            .lock()
            .unwrap()
            .insert(name.to_string(), oracle.clone());
        Ok(oracle)
    }
}
