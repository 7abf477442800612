//! JSON-RPC client of a geth chain peer.
//!
//! Transactions are sent with `eth_sendTransaction`, so every sender must be an account unlocked
//! on the peer (as the funder of a development network is).

use crate::Error;
use alloy::{
    network::ReceiptResponse,
    providers::{Provider, RootProvider},
    rpc::types::{TransactionInput, TransactionRequest},
};
use bytes::Bytes;
use ocrnet_bootstrap::{
    service::{PeerSpec, Service},
    Address, ChainClient, Endpoint, NodeInfo, PeerInfo, Receipt, TxHash, U256,
};
use serde::Deserialize;
use tracing::{debug, trace};

/// Prefix of a valid enode URL.
const ENODE_PREFIX: &str = "enode://";

#[derive(Deserialize, Debug)]
struct NodeInfoResult {
    id: String,
    enode: String,
}

#[derive(Deserialize, Debug)]
struct Network {
    #[serde(rename = "remoteAddress")]
    remote_address: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PeerResult {
    id: String,
    network: Option<Network>,
}

fn receipt(receipt: &impl ReceiptResponse) -> Receipt {
    Receipt {
        tx: receipt.transaction_hash(),
        block_number: receipt.block_number(),
        contract_address: receipt.contract_address(),
        success: receipt.status(),
    }
}

/// A geth peer reached over HTTP JSON-RPC.
#[derive(Clone)]
pub struct Geth {
    name: String,
    endpoint: Endpoint,
    provider: RootProvider,
}

impl Geth {
    pub fn new(name: &str, endpoint: Endpoint) -> Result<Self, Error> {
        let url = endpoint
            .http()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid rpc endpoint of {name}")))?;
        Ok(Self {
            name: name.to_string(),
            endpoint,
            provider: RootProvider::new_http(url),
        })
    }

    fn transport(
        &self,
        operation: &'static str,
        err: impl Into<Error>,
    ) -> ocrnet_bootstrap::Error {
        ocrnet_bootstrap::Error::transport(operation, &self.name, err.into())
    }

    async fn send_transaction(
        &self,
        operation: &'static str,
        transaction: TransactionRequest,
    ) -> Result<TxHash, ocrnet_bootstrap::Error> {
        trace!(peer = %self.name, operation, "sending transaction");
        let pending = self
            .provider
            .send_transaction(transaction)
            .await
            .map_err(|err| self.transport(operation, err))?;
        let tx = *pending.tx_hash();
        debug!(peer = %self.name, operation, %tx, "sent transaction");
        Ok(tx)
    }
}

impl Service for Geth {
    type Spec = PeerSpec;

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn is_ready(&self) -> bool {
        match self.node_info().await {
            Ok(info) => info.enode.starts_with(ENODE_PREFIX),
            Err(err) => {
                debug!(peer = %self.name, ?err, "peer not ready");
                false
            }
        }
    }
}

impl ChainClient for Geth {
    async fn node_info(&self) -> Result<NodeInfo, ocrnet_bootstrap::Error> {
        let info: NodeInfoResult = self
            .provider
            .raw_request("admin_nodeInfo".into(), ())
            .await
            .map_err(|err| self.transport("node_info", err))?;
        Ok(NodeInfo {
            id: info.id,
            enode: info.enode,
        })
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>, ocrnet_bootstrap::Error> {
        let peers: Vec<PeerResult> = self
            .provider
            .raw_request("admin_peers".into(), ())
            .await
            .map_err(|err| self.transport("peers", err))?;
        Ok(peers
            .into_iter()
            .map(|peer| PeerInfo {
                id: peer.id,
                remote_address: peer.network.and_then(|network| network.remote_address),
            })
            .collect())
    }

    async fn add_peer(&self, enode: &str) -> Result<bool, ocrnet_bootstrap::Error> {
        self.provider
            .raw_request("admin_addPeer".into(), (enode.to_string(),))
            .await
            .map_err(|err| self.transport("add_peer", err))
    }

    async fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ocrnet_bootstrap::Error> {
        let transaction = TransactionRequest::default().from(from).to(to).value(amount);
        self.send_transaction("transfer", transaction).await
    }

    async fn deploy(&self, from: Address, code: Bytes) -> Result<TxHash, ocrnet_bootstrap::Error> {
        // No recipient creates a contract
        let transaction = TransactionRequest::default()
            .from(from)
            .input(TransactionInput::both(code.into()));
        self.send_transaction("deploy", transaction).await
    }

    async fn call(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<TxHash, ocrnet_bootstrap::Error> {
        let transaction = TransactionRequest::default()
            .from(from)
            .to(to)
            .input(TransactionInput::both(data.into()));
        self.send_transaction("call", transaction).await
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<Receipt>, ocrnet_bootstrap::Error> {
        let result = self
            .provider
            .get_transaction_receipt(*tx)
            .await
            .map_err(|err| self.transport("receipt", err))?;
        Ok(result.as_ref().map(receipt))
    }

    async fn balance(&self, account: &Address) -> Result<U256, ocrnet_bootstrap::Error> {
        self.provider
            .get_balance(*account)
            .await
            .map_err(|err| self.transport("balance", err))
    }
}
