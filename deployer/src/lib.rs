//! Bootstrap an oracle reporting test network whose services are already running.
//!
//! A YAML file ([config::Config]) lists the chain peers, databases, oracle nodes and price feed
//! of the network. [runtime::Attached] resolves each service the bootstrap asks for to the
//! configured endpoint, [rpc::Geth] drives chain peers over JSON-RPC (through an `alloy`
//! provider) and [oracle::Node] drives oracle nodes over their authenticated HTTP API.
//!
//! The configuration written to the aggregator uses ocrnet's own blob encoding, which stock
//! (libocr) oracles cannot decode.
//!
//! The `ocrnet` binary wraps [bootstrap] and [feed::serve].

use commonware_runtime::Clock;
use ocrnet_bootstrap::{
    contracts::Contracts,
    sequencer::{Bootstrap, Config as BootstrapConfig},
    JobId, OracleId,
};
use rand::rngs::OsRng;
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;
use tracing::info;

pub mod config;
pub mod feed;
pub mod oracle;
pub mod rpc;
pub mod runtime;

/// Errors that can occur while running the deployer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("rpc error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] ocrnet_bootstrap::Error),
}

/// A bootstrap attached to live services.
type Live<E> =
    Bootstrap<E, runtime::Attached, rpc::Geth, runtime::Database, oracle::Node, runtime::Feed>;

/// Summary of a successful bootstrap.
#[derive(Clone, Debug)]
pub struct Summary {
    pub contracts: Contracts,
    pub jobs: BTreeMap<OracleId, JobId>,
}

/// Bootstrap the network described by the YAML file at `path`.
pub async fn bootstrap<E: Clock>(context: E, path: &Path) -> Result<Summary, Error> {
    let cfg = config::Config::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let artifacts = cfg.artifacts.load(base)?;
    let sequencer: BootstrapConfig = cfg.bootstrap(artifacts)?;
    info!(
        tag = %cfg.tag,
        peers = sequencer.peers.len(),
        oracles = sequencer.oracles.len(),
        "loaded config"
    );

    let runtime = runtime::Attached::new(&cfg)?;
    let bootstrap: Live<E> = Bootstrap::new(context, runtime, sequencer);
    let network = bootstrap.run(&mut OsRng).await?;
    Ok(Summary {
        contracts: network.contracts,
        jobs: network.jobs,
    })
}
