//! Wait for submitted transactions to be mined.

use crate::{
    poller::{self, poll_until, Check, Policy},
    ChainClient, Error, Receipt, TxHash,
};
use commonware_runtime::Clock;
use tracing::debug;

/// Poll `client` until `tx` is included in a block and return its receipt.
///
/// A receipt without a block number (for example, one for a transaction still sitting in the
/// pending pool) never satisfies the wait. Transport errors are retried on the next attempt. A
/// transaction that was mined but failed is returned as [Error::Reverted].
pub async fn wait_mined<E: Clock, C: ChainClient>(
    clock: &E,
    client: &C,
    tx: &TxHash,
    policy: Policy,
) -> Result<Receipt, Error> {
    let result = poll_until(clock, policy, |attempt| async move {
        let receipt = match client.receipt(tx).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                debug!(%tx, attempt, "no receipt");
                return Ok(Check::Pending(()));
            }
            Err(err) => {
                debug!(%tx, attempt, ?err, "failed to fetch receipt");
                return Ok(Check::Pending(()));
            }
        };
        if !receipt.is_mined() {
            debug!(%tx, attempt, "transaction pending");
            return Ok(Check::Pending(()));
        }
        if !receipt.success {
            return Err(Error::Reverted { tx: *tx });
        }
        Ok(Check::Done(receipt))
    })
    .await;
    match result {
        Ok(receipt) => {
            debug!(%tx, block = ?receipt.block_number, "transaction mined");
            Ok(receipt)
        }
        Err(poller::Error::Exhausted { attempts, .. }) => Err(Error::NotMined { tx: *tx, attempts }),
        Err(poller::Error::Fatal { source, .. }) => Err(source),
    }
}
