//! Bring up an oracle reporting test network and configure its aggregator on-chain.
//!
//! A bootstrap run starts a set of chain peers, forces them into a fully-connected mesh, deploys
//! the token and aggregator contracts, starts the oracle nodes (and their databases), funds the
//! oracles' accounts, collects every oracle's identity, encodes those identities into a single
//! aggregator configuration, and finally hands each oracle a job describing how to participate.
//!
//! # Design
//!
//! Every step that waits on distributed state (a peer handshake, a mined transaction, a funded
//! balance, a service becoming ready) is expressed with the single [poller::poll_until] primitive
//! and is bounded by either an attempt count or a deadline. Stages are strictly ordered: the
//! [sequencer] consumes the output of one stage as the (immutable) input of the next, so a stage
//! can never observe state that a previous stage has not confirmed.
//!
//! The orchestrator never talks to the outside world directly. Chain peers are driven through
//! [ChainClient], oracle nodes through [OracleClient], and services are started through
//! [service::Provision]. Tests drive in-memory implementations of each collaborator (the `mocks`
//! module) on the deterministic runtime.
//!
//! # Ordering
//!
//! Lists submitted on-chain (signers, transmitters, encrypted secrets) are always ordered by
//! [OracleId]. A reordering between any two of these lists yields an aggregator that rejects every
//! report, so no code path builds them from map iteration order.

use bytes::Bytes;
use std::{fmt, future::Future};
use thiserror::Error;

pub mod config;
pub mod contracts;
pub mod funding;
pub mod identity;
pub mod job;
pub mod mesh;
#[cfg(test)]
pub mod mocks;
pub mod poller;
pub mod sequencer;
pub mod service;
pub mod transaction;
pub mod types;

pub use types::{
    Address, CurrencyKey, Endpoint, JobId, KeyBundle, NodeInfo, OracleId, P2pKey, PeerId,
    PeerInfo, Receipt, ServiceId, TxHash, U256,
};

/// A stage of a bootstrap run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    ChainPeersUp,
    MeshConnected,
    ContractsDeployed,
    SupportServicesUp,
    AccountsFunded,
    IdentitiesCollected,
    ConfigSubmitted,
    JobsDeployed,
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ChainPeersUp => "chain peers up",
            Stage::MeshConnected => "mesh connected",
            Stage::ContractsDeployed => "contracts deployed",
            Stage::SupportServicesUp => "support services up",
            Stage::AccountsFunded => "accounts funded",
            Stage::IdentitiesCollected => "identities collected",
            Stage::ConfigSubmitted => "config submitted",
            Stage::JobsDeployed => "jobs deployed",
            Stage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Broad classification of an [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The network is misconfigured (wrong key counts, bad lengths, invalid thresholds, ...).
    /// Retrying will not help.
    Configuration,

    /// Distributed state did not converge within its budget. Retrying the run with a larger
    /// budget may help.
    Convergence,

    /// A single call to an external collaborator failed where no poller could retry it.
    Transport,
}

/// Errors that can occur while bootstrapping a network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{operation} failed on {target}: {source}")]
    Transport {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("peer {peer} rejected add-peer for {enode}")]
    AddPeerRejected { peer: PeerId, enode: String },
    #[error("transaction {tx} mined without a contract address")]
    MissingContractAddress { tx: TxHash },

    #[error("mesh requires at least 2 peers, got {0}")]
    NotEnoughPeers(usize),
    #[error("invalid topology: {0}")]
    InvalidTopology(&'static str),
    #[error("oracle {oracle} has {available} currency keys, needed index {index}")]
    MissingTransmitter {
        oracle: OracleId,
        index: usize,
        available: usize,
    },
    #[error("oracle {oracle} has {found} {kind}, expected exactly one")]
    KeyCount {
        oracle: OracleId,
        kind: &'static str,
        found: usize,
    },
    #[error("oracle {oracle} reported malformed {field}: {value}")]
    InvalidHex {
        oracle: OracleId,
        field: &'static str,
        value: String,
    },
    #[error("oracle {oracle} reported {field} of length {actual}, expected {expected}")]
    KeyLength {
        oracle: OracleId,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("oracle {0} reported an empty peer id")]
    EmptyPeerId(OracleId),
    #[error("oracle {oracle} reported a peer id of {length} bytes (max {max})")]
    PeerIdTooLong {
        oracle: OracleId,
        length: usize,
        max: usize,
    },
    #[error("transmission schedule {schedule:?} does not cover {oracles} oracles")]
    InvalidSchedule { schedule: Vec<u8>, oracles: usize },
    #[error("no oracles to configure")]
    NoOracles,
    #[error("too many oracles: {count} > {max}")]
    TooManyOracles { count: usize, max: usize },
    #[error("duplicate oracle: {0}")]
    DuplicateOracle(OracleId),
    #[error("duplicate signer: {0}")]
    DuplicateSigner(Address),
    #[error("duplicate transmitter: {0}")]
    DuplicateTransmitter(Address),
    #[error("fault tolerance {f} requires more than {f} oracles, got {oracles}")]
    Threshold { f: u8, oracles: usize },
    #[error("failed to encrypt shared secret: {0}")]
    Encryption(&'static str),
    #[error("no accounts to fund")]
    NoTargets,
    #[error("duplicate funding target: {0}")]
    DuplicateTarget(Address),
    #[error("invalid job for {oracle}: {reason}")]
    InvalidJob {
        oracle: OracleId,
        reason: &'static str,
    },
    #[error("transaction {tx} reverted")]
    Reverted { tx: TxHash },

    #[error("service {service} not ready after {attempts} attempts")]
    NotReady { service: String, attempts: usize },
    #[error("peer {peer} sees {observed} of {expected} peers after {attempts} attempts")]
    MeshNotConverged {
        peer: PeerId,
        expected: usize,
        observed: usize,
        attempts: usize,
    },
    #[error("transaction {tx} not mined after {attempts} attempts")]
    NotMined { tx: TxHash, attempts: usize },
    #[error("accounts still unfunded at deadline: {accounts:?}")]
    Unfunded { accounts: Vec<Address> },
    #[error("timed out during stage: {stage}")]
    Timeout { stage: Stage },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a failure reported by an external collaborator.
    pub fn transport(
        operation: &'static str,
        target: impl fmt::Display,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            operation,
            target: target.to_string(),
            source: source.into(),
        }
    }

    /// Classify the error (looking through stage wrappers).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. }
            | Error::AddPeerRejected { .. }
            | Error::MissingContractAddress { .. } => ErrorKind::Transport,
            Error::NotReady { .. }
            | Error::MeshNotConverged { .. }
            | Error::NotMined { .. }
            | Error::Unfunded { .. }
            | Error::Timeout { .. } => ErrorKind::Convergence,
            Error::Stage { source, .. } => source.kind(),
            _ => ErrorKind::Configuration,
        }
    }

    /// Returns the stage a bootstrap run failed in, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } | Error::Timeout { stage } => Some(*stage),
            _ => None,
        }
    }
}

/// Interface to a single chain peer.
///
/// Mutating calls return as soon as the transaction is submitted. Callers must wait for the
/// transaction to be mined (see [transaction::wait_mined]) before depending on its effects.
pub trait ChainClient: Clone + Send + Sync + 'static {
    /// Returns the peer's own node information.
    fn node_info(&self) -> impl Future<Output = Result<NodeInfo, Error>> + Send;

    /// Returns the peers this node is currently connected to.
    fn peers(&self) -> impl Future<Output = Result<Vec<PeerInfo>, Error>> + Send;

    /// Instruct the node to dial `enode`. Returns whether the node accepted the request.
    fn add_peer(&self, enode: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Transfer native currency.
    fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, Error>> + Send;

    /// Deploy a contract from its creation code (constructor arguments appended).
    fn deploy(
        &self,
        from: Address,
        code: Bytes,
    ) -> impl Future<Output = Result<TxHash, Error>> + Send;

    /// Call a contract with ABI-encoded calldata.
    fn call(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<TxHash, Error>> + Send;

    /// Returns the receipt of `tx`, if the node knows about it.
    fn receipt(&self, tx: &TxHash) -> impl Future<Output = Result<Option<Receipt>, Error>> + Send;

    /// Returns the native balance of `account`.
    fn balance(&self, account: &Address) -> impl Future<Output = Result<U256, Error>> + Send;
}

/// Interface to the (authenticated) API of a single oracle node.
pub trait OracleClient: Clone + Send + Sync + 'static {
    /// Port the oracle listens on for peer-to-peer traffic.
    fn p2p_port(&self) -> u16;

    /// List the currency-holding keys of the node.
    fn currency_keys(&self) -> impl Future<Output = Result<Vec<CurrencyKey>, Error>> + Send;

    /// List the peer-to-peer keys of the node.
    fn p2p_keys(&self) -> impl Future<Output = Result<Vec<P2pKey>, Error>> + Send;

    /// List the protocol key bundles of the node.
    fn key_bundles(&self) -> impl Future<Output = Result<Vec<KeyBundle>, Error>> + Send;

    /// Submit a rendered job descriptor.
    fn submit_job(&self, job: &job::JobSpec) -> impl Future<Output = Result<JobId, Error>> + Send;
}
