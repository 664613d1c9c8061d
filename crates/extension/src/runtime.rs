use crate::config::ExtensionConfig;
use crate::lifecycle::RecordGuard;
use crate::timeout::TimeoutTracker;
use model::{Clock, SystemClock};
use state::RecordStore;
use std::sync::Arc;

/// Everything a resource type's handlers share across invocations.
pub struct ExtensionRuntime {
    type_name: String,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: ExtensionConfig,
    // Budget for a whole operation, across every invocation
    total_timeout_minutes: u32,
}

impl ExtensionRuntime {
    /// Create a new `ExtensionRuntime` on the system clock.
    pub fn new(
        type_name: &str,
        store: Arc<dyn RecordStore>,
        config: ExtensionConfig,
        total_timeout_minutes: u32,
    ) -> Self {
        ExtensionRuntime {
            type_name: type_name.to_string(),
            store,
            clock: Arc::new(SystemClock),
            config,
            total_timeout_minutes,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    pub fn total_timeout_minutes(&self) -> u32 {
        self.total_timeout_minutes
    }

    pub(crate) fn tracker(&self) -> TimeoutTracker {
        TimeoutTracker::new(
            self.clock.clone(),
            self.config.handler_timeout,
            &self.type_name,
        )
    }

    pub(crate) fn guard(&self) -> RecordGuard {
        RecordGuard::new(self.store.clone(), self.clock.clone(), &self.type_name)
    }
}
