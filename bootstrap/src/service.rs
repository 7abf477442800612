//! Provision services and wait for them to become ready.
//!
//! Provisioning is parameterized by the service type: a runtime implements [Provision] once per
//! kind of service it can start and hands back a typed handle, so callers never need to inspect
//! (or downcast) a generic service.

use crate::{
    poller::{self, poll_until, Check, Policy},
    Address, Endpoint, Error,
};
use commonware_runtime::Clock;
use std::{future::Future, time::Duration};
use tracing::{debug, info};

/// Parameters of a chain peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSpec {
    /// Whether this is the peer every other peer (and every oracle) initially connects to.
    pub bootstrap: bool,
}

/// Parameters of an oracle node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleSpec {
    /// Database backing the oracle.
    pub database: Endpoint,

    /// Chain peer the oracle submits transactions through.
    pub chain: Endpoint,

    /// Token the oracle is paid in.
    pub token: Address,
}

/// A handle to a provisioned service.
pub trait Service: Clone + Send + Sync + 'static {
    /// Parameters required to start the service.
    type Spec: Send + Sync + 'static;

    /// Primary endpoint of the service (RPC for chain peers, API for oracles, ...).
    fn endpoint(&self) -> Endpoint;

    /// Returns true once the service accepts requests.
    ///
    /// Failures to reach the service are reported as `false`.
    fn is_ready(&self) -> impl Future<Output = bool> + Send;
}

/// A runtime able to start services of type `S`.
pub trait Provision<S: Service>: Send + Sync {
    /// Start a service named `name`.
    ///
    /// The returned handle may not be ready yet (see [Readiness]).
    fn provision(&self, name: &str, spec: S::Spec) -> impl Future<Output = Result<S, Error>> + Send;
}

/// Gate that resolves once a provisioned service is ready.
#[derive(Clone)]
pub struct Readiness<S: Service> {
    name: String,
    service: S,
}

impl<S: Service> Readiness<S> {
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self {
            name: name.into(),
            service,
        }
    }

    /// Poll the service every `interval` (at most `attempts` times) until it reports ready.
    pub async fn wait_ready<C: Clock>(
        &self,
        clock: &C,
        interval: Duration,
        attempts: usize,
    ) -> Result<(), Error> {
        let result = poll_until(clock, Policy::attempts(interval, attempts), |attempt| {
            let service = self.service.clone();
            async move {
                if service.is_ready().await {
                    return Ok::<_, Error>(Check::Done(()));
                }
                debug!(attempt, "service not ready");
                Ok(Check::Pending(()))
            }
        })
        .await;
        match result {
            Ok(()) => {
                info!(service = %self.name, endpoint = %self.service.endpoint(), "service ready");
                Ok(())
            }
            Err(poller::Error::Exhausted { attempts, .. }) => Err(Error::NotReady {
                service: self.name.clone(),
                attempts,
            }),
            Err(poller::Error::Fatal { source, .. }) => Err(source),
        }
    }
}

/// Start a service of type `S` on `runtime` and return it with its readiness gate.
pub async fn provision<S, R>(
    runtime: &R,
    name: &str,
    spec: S::Spec,
) -> Result<(S, Readiness<S>), Error>
where
    S: Service,
    R: Provision<S>,
{
    let service = runtime.provision(name, spec).await?;
    debug!(service = name, endpoint = %service.endpoint(), "provisioned service");
    let readiness = Readiness::new(name, service.clone());
    Ok((service, readiness))
}
