use super::{address, World};
use crate::{
    service::{PeerSpec, Service},
    Address, ChainClient, Endpoint, Error, NodeInfo, PeerInfo, Receipt, TxHash, U256,
};
use bytes::Bytes;
use commonware_runtime::Clock;

/// Port chain peers serve RPC on.
const RPC_PORT: u16 = 8545;

/// A client of a single simulated chain peer.
#[derive(Clone)]
pub struct ChainPeer<E: Clock> {
    world: World<E>,
    name: String,
}

impl<E: Clock> ChainPeer<E> {
    pub(super) fn new(world: World<E>, name: &str) -> Self {
        Self {
            world,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E: Clock> Service for ChainPeer<E> {
    type Spec = PeerSpec;

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), RPC_PORT)
    }

    async fn is_ready(&self) -> bool {
        let state = self.world.state.lock().unwrap();
        self.world
            .ensure_ready(&state, &self.name, "is_ready")
            .is_ok()
    }
}

impl<E: Clock> ChainClient for ChainPeer<E> {
    async fn node_info(&self) -> Result<NodeInfo, Error> {
        let state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "node_info")?;
        let peer = &state.peers[&self.name];
        Ok(NodeInfo {
            id: peer.node_id.clone(),
            enode: peer.enode.clone(),
        })
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>, Error> {
        let state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "peers")?;
        let now = self.world.context().current();
        let mut connected = Vec::new();
        for ((a, b), established) in &state.links {
            let other = if *a == self.name {
                b
            } else if *b == self.name {
                a
            } else {
                continue;
            };
            if now < *established || state.peers[a].isolated || state.peers[b].isolated {
                continue;
            }
            connected.push(PeerInfo {
                id: state.peers[other].node_id.clone(),
                remote_address: Some(format!("{other}:30303")),
            });
        }
        Ok(connected)
    }

    async fn add_peer(&self, enode: &str) -> Result<bool, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "add_peer")?;
        if state.peers[&self.name].reject_add_peer {
            return Ok(false);
        }
        let Some(target) = state
            .peers
            .iter()
            .find(|(_, peer)| peer.enode == enode)
            .map(|(name, _)| name.clone())
        else {
            return Ok(false);
        };
        if target == self.name {
            return Ok(true);
        }
        let key = if target < self.name {
            (target, self.name.clone())
        } else {
            (self.name.clone(), target)
        };
        let established = self.world.context().current() + self.world.config().handshake_latency;
        state.links.entry(key).or_insert(established);
        Ok(true)
    }

    async fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<TxHash, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "transfer")?;
        state.transfers.push(super::Transfer { from, to, amount });
        Ok(self.world.submit(&mut state, Some((to, amount)), None, false))
    }

    async fn deploy(&self, from: Address, code: Bytes) -> Result<TxHash, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "deploy")?;
        let contract = address(&state.nonce.to_string(), "contract");
        state.deployments.push(super::Deployment {
            from,
            address: contract,
            code,
        });
        Ok(self.world.submit(&mut state, None, Some(contract), false))
    }

    async fn call(&self, from: Address, to: Address, data: Bytes) -> Result<TxHash, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "call")?;
        let reverted = self.world.reverts(&state, &data);
        state.calls.push(super::Call { from, to, data });
        Ok(self.world.submit(&mut state, None, None, reverted))
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<Receipt>, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "receipt")?;
        self.world.settle(&mut state);
        let now = self.world.context().current();
        let Some(pending) = state.transactions.get_mut(tx) else {
            return Ok(None);
        };
        pending.queries += 1;
        if pending.pending_receipts == 0 && now >= pending.mined_at {
            return Ok(Some(Receipt {
                tx: *tx,
                block_number: Some(pending.block),
                contract_address: pending.contract,
                success: !pending.reverted,
            }));
        }
        pending.pending_receipts = pending.pending_receipts.saturating_sub(1);
        Ok(Some(Receipt {
            tx: *tx,
            block_number: None,
            contract_address: None,
            success: true,
        }))
    }

    async fn balance(&self, account: &Address) -> Result<U256, Error> {
        let mut state = self.world.state.lock().unwrap();
        self.world.ensure_ready(&state, &self.name, "balance")?;
        self.world.settle(&mut state);
        Ok(state.balances.get(account).copied().unwrap_or_default())
    }
}
