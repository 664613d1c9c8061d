use crate::timeout::TimeoutTracker;
use async_trait::async_trait;
use lambda_runtime::tracing;
use model::{CallbackContext, Error};
use std::future::Future;
use std::time::Duration;

/// Observations in a row required before [`ConsecutiveObservations`] reports stable.
pub const DEFAULT_OBSERVATION_THRESHOLD: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stabilization {
    /// Every check is satisfied.
    Stable,
    /// The invocation budget ran out, the operation must be re-invoked.
    InProgress,
}

/// An idempotent predicate over the state of an external system.
///
/// May record progress in the callback context, which is carried to later invocations.
#[async_trait(?Send)]
pub trait StabilizationCheck {
    async fn is_stable(&mut self, context: &mut CallbackContext) -> Result<bool, Error>;
}

/// Poll each check in order until it is satisfied.
///
/// An unsatisfied check is retried after `retry_sleep` for as long as the
/// invocation budget allows, later checks are not evaluated until it passes.
/// The resource timeout is checked before every poll and is fatal.
pub async fn run_with_stabilization(
    tracker: &TimeoutTracker,
    context: &mut CallbackContext,
    checks: &mut [&mut dyn StabilizationCheck],
    retry_sleep: Duration,
) -> Result<Stabilization, Error> {
    for (index, check) in checks.iter_mut().enumerate() {
        let mut polls: u32 = 0;

        loop {
            tracker.resource_timeout_exceeded(context)?;

            polls += 1;
            if check.is_stable(context).await? {
                tracing::debug!("Stabilization check {index} passed after {polls} polls");
                break;
            }

            if tracker.handler_timeout_exceeded(context)? {
                tracing::info!(
                    "Stabilization check {index} still pending after {polls} polls, yielding"
                );
                return Ok(Stabilization::InProgress);
            }

            tracker.clock().sleep(retry_sleep).await;
        }
    }

    Ok(Stabilization::Stable)
}

/// A single look at the external system.
pub trait Observation {
    fn observe(&mut self) -> impl Future<Output = Result<bool, Error>>;
}

impl<F, Fut> Observation for F
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    fn observe(&mut self) -> impl Future<Output = Result<bool, Error>> {
        (self)()
    }
}

/// Stable only once the observation has held more than `threshold` times in a row.
///
/// Directory services are eventually consistent, a single positive read does
/// not mean every replica agrees. The count lives in the callback context so
/// it carries across invocations, and once reached the observation is not
/// repeated.
pub struct ConsecutiveObservations<O> {
    key: String,
    threshold: u64,
    observation: O,
}

impl<O: Observation> ConsecutiveObservations<O> {
    pub fn new(key: impl Into<String>, observation: O) -> Self {
        ConsecutiveObservations {
            key: key.into(),
            threshold: DEFAULT_OBSERVATION_THRESHOLD,
            observation,
        }
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    fn found_times_key(&self) -> String {
        format!("{}_found_times", self.key)
    }

    fn done_key(&self) -> String {
        format!("{}_done", self.key)
    }
}

#[async_trait(?Send)]
impl<O: Observation> StabilizationCheck for ConsecutiveObservations<O> {
    async fn is_stable(&mut self, context: &mut CallbackContext) -> Result<bool, Error> {
        if context.flag(&self.done_key()) {
            return Ok(true);
        }

        if !self.observation.observe().await? {
            context.set_counter(self.found_times_key(), 0);
            return Ok(false);
        }

        let found_times: u64 = context.counter(&self.found_times_key()).unwrap_or(0) + 1;
        context.set_counter(self.found_times_key(), found_times);

        if found_times > self.threshold {
            context.set_flag(self.done_key());
            return Ok(true);
        }

        Ok(false)
    }
}
