//! In-memory collaborators that run on the deterministic runtime.
//!
//! A [World] simulates a private chain: peers that complete handshakes after a configurable
//! latency, transactions that are mined after a block time, and balances that change only once a
//! transfer is mined. [Oracle]s report deterministic keys derived from their name, and [Runtime]
//! provisions every kind of service a bootstrap needs.

use crate::{Address, Error, TxHash, U256};
use bytes::Bytes;
use commonware_runtime::Clock;
use commonware_utils::hex;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

mod chain;
mod oracle;
mod runtime;

pub use chain::ChainPeer;
pub use oracle::Oracle;
pub use runtime::{Database, Feed, Provisioned, Runtime};

/// Account every test transaction is sent from.
pub const FUNDER: Address = Address::new([0xf0; 20]);

/// Behavior of a [World].
#[derive(Clone, Debug)]
pub struct Config {
    /// Time between provisioning a service and the service becoming ready.
    pub startup_delay: Duration,

    /// Time between an add-peer call and both peers reporting the connection.
    pub handshake_latency: Duration,

    /// Time between submitting a transaction and its inclusion in a block.
    pub block_time: Duration,

    /// Number of receipt queries answered with an unmined receipt for each transaction
    /// (regardless of the block time).
    pub pending_receipts: usize,

    /// If set, transfers are mined but never credited.
    pub frozen_balances: bool,

    /// If set, every transaction is mined with a failed status (see [World::revert_calls] to fail
    /// only some calls).
    pub revert: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(3),
            handshake_latency: Duration::from_secs(2),
            block_time: Duration::from_secs(1),
            pending_receipts: 0,
            frozen_balances: false,
            revert: false,
        }
    }
}

/// A native transfer submitted to the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// A contract call submitted to the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// A contract deployment submitted to the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub from: Address,
    pub address: Address,
    pub code: Bytes,
}

struct Peer {
    node_id: String,
    enode: String,
    ready_at: SystemTime,
    reject_add_peer: bool,
    isolated: bool,
}

struct Transaction {
    block: u64,
    mined_at: SystemTime,
    pending_receipts: usize,
    queries: usize,
    contract: Option<Address>,
    credit: Option<(Address, U256)>,
    reverted: bool,
    applied: bool,
}

#[derive(Default)]
struct State {
    peers: BTreeMap<String, Peer>,
    links: BTreeMap<(String, String), SystemTime>,
    transactions: BTreeMap<TxHash, Transaction>,
    balances: BTreeMap<Address, U256>,
    reverted_selectors: BTreeSet<[u8; 4]>,
    transfers: Vec<Transfer>,
    calls: Vec<Call>,
    deployments: Vec<Deployment>,
    nonce: u64,
}

/// Derive 32 deterministic bytes from `name` and `label`.
pub(crate) fn derive(name: &str, label: &str) -> [u8; 32] {
    Sha256::new()
        .chain_update(name.as_bytes())
        .chain_update(b"/")
        .chain_update(label.as_bytes())
        .finalize()
        .into()
}

pub(crate) fn address(name: &str, label: &str) -> Address {
    let digest = derive(name, label);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    Address::new(bytes)
}

/// A simulated chain shared by every [ChainPeer].
#[derive(Clone)]
pub struct World<E: Clock> {
    context: E,
    cfg: Config,
    state: Arc<Mutex<State>>,
}

impl<E: Clock> World<E> {
    pub fn new(context: E, cfg: Config) -> Self {
        Self {
            context,
            cfg,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub(crate) fn context(&self) -> &E {
        &self.context
    }

    pub(crate) fn config(&self) -> &Config {
        &self.cfg
    }

    /// Returns a client for peer `name` (which is ready immediately).
    pub fn chain_peer(&self, name: &str) -> ChainPeer<E> {
        self.add_peer(name, self.context.current())
    }

    pub(crate) fn add_peer(&self, name: &str, ready_at: SystemTime) -> ChainPeer<E> {
        let node_id = hex(&derive(name, "node"));
        let enode = format!("enode://{node_id}@{name}:30303");
        self.state
            .lock()
            .unwrap()
            .peers
            .entry(name.to_string())
            .or_insert(Peer {
                node_id,
                enode,
                ready_at,
                reject_add_peer: false,
                isolated: false,
            });
        ChainPeer::new(self.clone(), name)
    }

    /// Make peer `name` reject every add-peer call.
    pub fn reject_add_peer(&self, name: &str) {
        if let Some(peer) = self.state.lock().unwrap().peers.get_mut(name) {
            peer.reject_add_peer = true;
        }
    }

    /// Prevent every handshake involving peer `name` from completing.
    pub fn isolate(&self, name: &str) {
        if let Some(peer) = self.state.lock().unwrap().peers.get_mut(name) {
            peer.isolated = true;
        }
    }

    /// Mine every later call whose calldata starts with `selector` with a failed status.
    pub fn revert_calls(&self, selector: [u8; 4]) {
        self.state.lock().unwrap().reverted_selectors.insert(selector);
    }

    /// Credit `account` directly (outside of any transaction).
    pub fn set_balance(&self, account: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert(account, amount);
    }

    /// Returns the settled balance of `account`.
    pub fn balance_of(&self, account: &Address) -> U256 {
        let mut state = self.state.lock().unwrap();
        self.settle(&mut state);
        state.balances.get(account).copied().unwrap_or_default()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.state.lock().unwrap().deployments.clone()
    }

    /// Returns how many times the receipt of `tx` was requested.
    pub fn receipt_queries(&self, tx: &TxHash) -> usize {
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(tx)
            .map(|tx| tx.queries)
            .unwrap_or(0)
    }

    /// Returns whether `tx` has been mined successfully.
    pub fn is_mined(&self, tx: &TxHash) -> bool {
        let now = self.context.current();
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(tx)
            .is_some_and(|tx| now >= tx.mined_at && !tx.reverted)
    }

    /// Apply the effects of every transaction mined by now.
    fn settle(&self, state: &mut State) {
        let now = self.context.current();
        let mut credits = Vec::new();
        for tx in state.transactions.values_mut() {
            if tx.applied || now < tx.mined_at {
                continue;
            }
            tx.applied = true;
            if tx.reverted || self.cfg.frozen_balances {
                continue;
            }
            if let Some(credit) = tx.credit {
                credits.push(credit);
            }
        }
        for (account, amount) in credits {
            *state.balances.entry(account).or_default() += amount;
        }
    }

    /// Returns whether a call carrying `data` is configured to revert.
    fn reverts(&self, state: &State, data: &[u8]) -> bool {
        data.get(..4)
            .and_then(|selector| <[u8; 4]>::try_from(selector).ok())
            .is_some_and(|selector| state.reverted_selectors.contains(&selector))
    }

    fn submit(
        &self,
        state: &mut State,
        credit: Option<(Address, U256)>,
        contract: Option<Address>,
        reverted: bool,
    ) -> TxHash {
        state.nonce += 1;
        let tx = TxHash::new(derive(&state.nonce.to_string(), "tx"));
        state.transactions.insert(
            tx,
            Transaction {
                block: state.nonce,
                mined_at: self.context.current() + self.cfg.block_time,
                pending_receipts: self.cfg.pending_receipts,
                queries: 0,
                contract,
                credit,
                reverted: reverted || self.cfg.revert,
                applied: false,
            },
        );
        tx
    }

    fn ensure_ready(&self, state: &State, name: &str, operation: &'static str) -> Result<(), Error> {
        match state.peers.get(name) {
            Some(peer) if self.context.current() >= peer.ready_at => Ok(()),
            Some(_) => Err(Error::transport(operation, name, "connection refused")),
            None => Err(Error::transport(operation, name, "unknown peer")),
        }
    }
}
