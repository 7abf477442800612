//! Retry a check until distributed state converges.
//!
//! [poll_until] is the only place the orchestrator suspends while waiting on external state. Each
//! call is bounded by a [Budget]: either a number of attempts or a wall-clock deadline (measured
//! with the runtime's [Clock], so deadlines are simulated under the deterministic runtime).
//!
//! A check distinguishes three outcomes:
//! - `Ok(Check::Done(value))`: the state converged, polling stops.
//! - `Ok(Check::Pending(observation))`: not yet, poll again after `interval`.
//! - `Err(e)`: something unexpected happened, polling stops immediately.
//!
//! Checks that want transient transport failures to be retried must map them to
//! [Check::Pending] themselves.

use commonware_runtime::Clock;
use std::{
    future::Future,
    time::{Duration, SystemTime},
};
use thiserror::Error;

/// How many times (or for how long) to poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    /// Poll at most this many times (at least one attempt is always made).
    Attempts(usize),

    /// Poll until this point in time.
    Deadline(SystemTime),
}

/// Polling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Time to wait between consecutive attempts.
    pub interval: Duration,

    /// Bound on the number of attempts.
    pub budget: Budget,
}

impl Policy {
    pub const fn attempts(interval: Duration, attempts: usize) -> Self {
        Self {
            interval,
            budget: Budget::Attempts(attempts),
        }
    }

    pub const fn deadline(interval: Duration, deadline: SystemTime) -> Self {
        Self {
            interval,
            budget: Budget::Deadline(deadline),
        }
    }
}

/// The result of a single check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check<T, P = ()> {
    Done(T),
    Pending(P),
}

/// Errors that can occur while polling.
#[derive(Error, Debug)]
pub enum Error<P, E> {
    /// The budget was exhausted without the check converging. `last` holds the observation of
    /// the final attempt.
    #[error("transient exhausted after {attempts} attempts")]
    Exhausted { attempts: usize, last: P },

    /// The check returned an error.
    #[error("encountered fatal error on attempt {attempt}: {source}")]
    Fatal { attempt: usize, source: E },
}

/// Call `check` until it reports [Check::Done], the budget runs out, or it returns an error.
///
/// `check` receives the (1-indexed) attempt number. There is no sleep after the final attempt.
pub async fn poll_until<C, F, Fut, T, P, E>(
    clock: &C,
    policy: Policy,
    mut check: F,
) -> Result<T, Error<P, E>>
where
    C: Clock,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Check<T, P>, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last = match check(attempt).await {
            Ok(Check::Done(value)) => return Ok(value),
            Ok(Check::Pending(last)) => last,
            Err(source) => return Err(Error::Fatal { attempt, source }),
        };

        // Determine how long to wait before the next attempt (if there is one)
        let wait = match policy.budget {
            Budget::Attempts(max) => {
                if attempt >= max {
                    return Err(Error::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                policy.interval
            }
            Budget::Deadline(deadline) => {
                let remaining = deadline
                    .duration_since(clock.current())
                    .unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    return Err(Error::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                remaining.min(policy.interval)
            }
        };
        clock.sleep(wait).await;
    }
}
