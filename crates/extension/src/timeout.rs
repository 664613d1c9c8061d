use crate::error::HandlerError;
use chrono::{DateTime, TimeDelta, Utc};
use lambda_runtime::tracing;
use model::{CallbackContext, Clock};
use std::sync::Arc;
use std::time::Duration;

/// Reset on every invocation.
pub const HANDLER_ENTRY_TIME: &str = "_cf_core_handler_entry_time";
/// Set once on the first invocation of an operation.
pub const RESOURCE_END_TIME: &str = "_cf_core_resource_end_time";

/// Tracks the two deadlines a handler works against: the budget of the current
/// invocation and the end of the whole operation across invocations.
///
/// Both are kept as timestamps in the callback context.
#[derive(Clone)]
pub struct TimeoutTracker {
    clock: Arc<dyn Clock>,
    handler_timeout: Duration,
    type_name: String,
}

impl TimeoutTracker {
    pub fn new(clock: Arc<dyn Clock>, handler_timeout: Duration, type_name: &str) -> Self {
        TimeoutTracker {
            clock,
            handler_timeout,
            type_name: type_name.to_string(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn mark_handler_entry(&self, context: &mut CallbackContext) {
        context.set_timestamp(HANDLER_ENTRY_TIME, self.clock.now());
    }

    pub fn mark_resource_end_time(&self, context: &mut CallbackContext, total_timeout_minutes: u32) {
        if context.contains(RESOURCE_END_TIME) {
            return;
        }

        let end_time: DateTime<Utc> =
            self.clock.now() + TimeDelta::minutes(i64::from(total_timeout_minutes));
        tracing::debug!("Operation must complete by {end_time}");

        context.set_timestamp(RESOURCE_END_TIME, end_time);
    }

    /// Whether this invocation has used up its budget and should yield.
    pub fn handler_timeout_exceeded(&self, context: &CallbackContext) -> Result<bool, HandlerError> {
        let entry_time: DateTime<Utc> = context.timestamp(HANDLER_ENTRY_TIME).ok_or_else(|| {
            HandlerError::InternalFailure("Handler entry time was never marked".to_string())
        })?;
        let budget: TimeDelta = TimeDelta::from_std(self.handler_timeout).unwrap_or(TimeDelta::MAX);

        Ok(self.clock.now() - entry_time > budget)
    }

    /// Fails once the operation as a whole has run past its end time.
    pub fn resource_timeout_exceeded(&self, context: &CallbackContext) -> Result<(), HandlerError> {
        let end_time: DateTime<Utc> = context.timestamp(RESOURCE_END_TIME).ok_or_else(|| {
            HandlerError::InternalFailure("Resource end time was never marked".to_string())
        })?;

        if self.clock.now() > end_time {
            tracing::warn!("Resource of type {} timed out at {end_time}", self.type_name);

            return Err(HandlerError::ResourceTimeout {
                type_name: self.type_name.clone(),
            });
        }

        Ok(())
    }
}
