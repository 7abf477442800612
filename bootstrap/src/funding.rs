//! Fund accounts with native currency and wait for the transfers to land.

use crate::{
    poller::{self, poll_until, Check, Policy},
    Address, ChainClient, Error, U256,
};
use commonware_runtime::Clock;
use futures::future::join_all;
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, info};

/// Transfer `amount` from `from` to every target and wait until each target holds a non-zero
/// balance.
///
/// Transfers are submitted one at a time (in the order given) without waiting for them to be
/// mined. Balances are then queried concurrently every `interval` until `timeout` elapses. A zero
/// `amount` submits no transfers (the targets must already be funded by other means).
///
/// Fails with [Error::Unfunded] listing every account still at zero once the deadline passes.
pub async fn fund_and_confirm<E: Clock, C: ChainClient>(
    clock: &E,
    client: &C,
    from: Address,
    targets: &[Address],
    amount: U256,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    if targets.is_empty() {
        return Err(Error::NoTargets);
    }
    let mut seen = BTreeSet::new();
    for target in targets {
        if !seen.insert(target) {
            return Err(Error::DuplicateTarget(*target));
        }
    }
    let deadline = clock.current() + timeout;

    // Submit transfers
    if !amount.is_zero() {
        for target in targets {
            let tx = client.transfer(from, *target, amount).await?;
            debug!(%from, to = %target, %amount, %tx, "submitted transfer");
        }
    }

    // Wait for every balance to become non-zero
    let result = poll_until(clock, Policy::deadline(interval, deadline), |attempt| async move {
        let balances = join_all(targets.iter().map(|target| client.balance(target))).await;
        let mut unfunded = Vec::new();
        for (target, balance) in targets.iter().zip(balances) {
            match balance {
                Ok(balance) if balance.is_zero() => unfunded.push(*target),
                Ok(_) => {}
                Err(err) => {
                    debug!(account = %target, attempt, ?err, "failed to fetch balance");
                    unfunded.push(*target);
                }
            }
        }
        if unfunded.is_empty() {
            return Ok::<_, Error>(Check::Done(()));
        }
        debug!(attempt, unfunded = unfunded.len(), "waiting for balances");
        Ok(Check::Pending(unfunded))
    })
    .await;
    match result {
        Ok(()) => {
            info!(accounts = targets.len(), "accounts funded");
            Ok(())
        }
        Err(poller::Error::Exhausted { last, .. }) => Err(Error::Unfunded { accounts: last }),
        Err(poller::Error::Fatal { source, .. }) => Err(source),
    }
}
