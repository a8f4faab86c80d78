//! Generic lifecycle polling shared by every resource kind.
//!
//! Cloud transitions are eventually consistent: a launch or capture request
//! returns immediately and the resource walks through intermediate states
//! afterwards. [`wait_for_state`] turns that into a single awaitable result
//! given a fetch function and a [`StateExpectation`].

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delay between polls used when no policy is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Marker for lifecycle vocabularies the poller can compare and report.
pub trait LifecycleState: Copy + Eq + Display + Debug + Send + Sync {}

impl<T> LifecycleState for T where T: Copy + Eq + Display + Debug + Send + Sync {}

/// Retry budget and inter-poll delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    max_retries: u32,
    delay: Duration,
}

impl WaitPolicy {
    /// Polls until the resource settles, however long that takes.
    #[must_use]
    pub const fn unlimited(delay: Duration) -> Self {
        Self {
            max_retries: 0,
            delay,
        }
    }

    /// Gives up after `max_retries` fetches. A budget of zero means unlimited.
    #[must_use]
    pub const fn bounded(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Retry budget; zero means unlimited.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fixed delay between polls.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    const fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries != 0 && attempts >= self.max_retries
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::unlimited(DEFAULT_POLL_INTERVAL)
    }
}

/// States worth waiting through, and the state that ends the wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateExpectation<S> {
    waiting: Vec<S>,
    terminal: S,
}

impl<S: LifecycleState> StateExpectation<S> {
    /// Builds an expectation from the waiting set and terminal target.
    #[must_use]
    pub fn new(waiting: impl IntoIterator<Item = S>, terminal: S) -> Self {
        Self {
            waiting: waiting.into_iter().collect(),
            terminal,
        }
    }

    /// States that keep the poller waiting.
    #[must_use]
    pub fn waiting(&self) -> &[S] {
        &self.waiting
    }

    /// State that completes the wait.
    #[must_use]
    pub const fn terminal(&self) -> S {
        self.terminal
    }

    fn describe_waiting(&self) -> String {
        self.waiting
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Errors raised while waiting for a resource to settle.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The fetch function failed; surfaced unchanged.
    #[error(transparent)]
    Fetch(E),
    /// The resource reported a state outside the expected vocabulary.
    #[error(
        "{resource} reported unexpected state {observed}, expecting a waiting state [{waiting}] or terminal state {terminal}"
    )]
    UnexpectedState {
        /// Resource being polled.
        resource: String,
        /// State actually observed.
        observed: String,
        /// Waiting states, comma separated.
        waiting: String,
        /// Expected terminal state.
        terminal: String,
    },
    /// A bounded budget ran out before the terminal state appeared.
    #[error(
        "maximum number of retries ({max_retries}) exceeded; {resource} did not reach state {terminal}"
    )]
    RetriesExhausted {
        /// Resource being polled.
        resource: String,
        /// Budget that was exhausted.
        max_retries: u32,
        /// Terminal state that was never observed.
        terminal: String,
    },
    /// The caller cancelled the wait.
    #[error("wait for {resource} was cancelled")]
    Cancelled {
        /// Resource being polled.
        resource: String,
    },
}

/// Polls `fetch` until it reports the expectation's terminal state.
///
/// Waiting states sleep for the policy delay and poll again. The terminal
/// state returns immediately. Any other state fails at once without retrying,
/// and so does a fetch error. Cancellation is honoured before each fetch,
/// during each fetch, and during each sleep.
///
/// # Errors
///
/// Returns [`PollError::Fetch`] when `fetch` fails,
/// [`PollError::UnexpectedState`] on a state outside the expectation,
/// [`PollError::RetriesExhausted`] when a bounded budget runs out, and
/// [`PollError::Cancelled`] when `ctx` is cancelled.
pub async fn wait_for_state<S, E, F, Fut>(
    ctx: &CancellationToken,
    resource: &str,
    policy: WaitPolicy,
    expectation: &StateExpectation<S>,
    mut fetch: F,
) -> Result<(), PollError<E>>
where
    S: LifecycleState,
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
{
    let mut attempts: u32 = 0;
    loop {
        if ctx.is_cancelled() {
            return Err(cancelled(resource));
        }

        let fetched = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(cancelled(resource)),
            fetched = fetch() => fetched,
        };
        let state = fetched.map_err(PollError::Fetch)?;
        attempts = attempts.saturating_add(1);

        if expectation.waiting.contains(&state) {
            debug!(
                resource,
                %state,
                attempts,
                terminal = %expectation.terminal,
                "resource still settling"
            );
            if policy.exhausted(attempts) {
                return Err(PollError::RetriesExhausted {
                    resource: resource.to_owned(),
                    max_retries: policy.max_retries,
                    terminal: expectation.terminal.to_string(),
                });
            }
            tokio::select! {
                biased;
                () = ctx.cancelled() => return Err(cancelled(resource)),
                () = sleep(policy.delay) => {}
            }
            continue;
        }

        if state == expectation.terminal {
            debug!(resource, %state, attempts, "resource reached terminal state");
            return Ok(());
        }

        return Err(PollError::UnexpectedState {
            resource: resource.to_owned(),
            observed: state.to_string(),
            waiting: expectation.describe_waiting(),
            terminal: expectation.terminal.to_string(),
        });
    }
}

fn cancelled<E>(resource: &str) -> PollError<E>
where
    E: std::error::Error + 'static,
{
    PollError::Cancelled {
        resource: resource.to_owned(),
    }
}
