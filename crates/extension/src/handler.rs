use crate::error::{HandlerError, INTERNAL_FAILURE_MESSAGE};
use crate::identifier;
use crate::lifecycle::{CreateSession, DeleteSession, RecordGuard, RecordSession, finish};
use crate::runtime::ExtensionRuntime;
use crate::stabilization::{self, Stabilization, StabilizationCheck};
use crate::timeout::TimeoutTracker;
use lambda_runtime::tracing;
use model::{CallbackContext, Error, HandlerRequest, ProgressEvent, ResourceModel};
use std::time::Duration;

/// Set by the first create session of an operation, so later invocations are
/// recognised as continuing it.
pub const CREATE_IN_FLIGHT: &str = "_cf_core_create_in_flight";
/// Where a model is stashed between invocations.
pub const SAVED_MODEL: &str = "_cf_core_model";

/// The state of one handler invocation.
///
/// Entering marks the invocation and operation clocks, record access goes
/// through scoped sessions and the invocation ends by turning the handler
/// into exactly one progress event.
pub struct HandlerContext<M: ResourceModel> {
    request: HandlerRequest<M>,
    callback_context: CallbackContext,
    tracker: TimeoutTracker,
    guard: RecordGuard,
    total_timeout_minutes: u32,
}

impl<M: ResourceModel> HandlerContext<M> {
    pub fn enter(
        runtime: &ExtensionRuntime,
        request: HandlerRequest<M>,
        callback_context: Option<CallbackContext>,
    ) -> Self {
        Self::start(
            request,
            callback_context.unwrap_or_default(),
            runtime.tracker(),
            runtime.guard(),
            runtime.total_timeout_minutes(),
        )
    }

    fn start(
        request: HandlerRequest<M>,
        mut callback_context: CallbackContext,
        tracker: TimeoutTracker,
        guard: RecordGuard,
        total_timeout_minutes: u32,
    ) -> Self {
        tracker.mark_handler_entry(&mut callback_context);
        tracker.mark_resource_end_time(&mut callback_context, total_timeout_minutes);

        HandlerContext {
            request,
            callback_context,
            tracker,
            guard,
            total_timeout_minutes,
        }
    }

    /// A fresh handler for chaining into another operation, such as a read
    /// after a create. It starts from a copy of this handler's callback context.
    pub fn downstream(&self) -> Self {
        Self::start(
            self.request.clone(),
            self.callback_context.clone(),
            self.tracker.clone(),
            self.guard.clone(),
            self.total_timeout_minutes,
        )
    }

    /// Replace the desired state, for handlers chained from one that has just
    /// produced the model.
    pub fn with_desired_model(mut self, model: M) -> Self {
        self.request.desired_resource_state = Some(model);
        self
    }

    pub fn request(&self) -> &HandlerRequest<M> {
        &self.request
    }

    pub fn type_name(&self) -> &str {
        self.guard.type_name()
    }

    pub fn desired_model(&self) -> Result<&M, HandlerError> {
        self.request.desired_resource_state.as_ref().ok_or_else(|| {
            HandlerError::InvalidRequest("Request has no desired resource state".to_string())
        })
    }

    pub fn callback_context(&self) -> &CallbackContext {
        &self.callback_context
    }

    pub fn callback_context_mut(&mut self) -> &mut CallbackContext {
        &mut self.callback_context
    }

    /// Identifier of a resource created in an external system.
    pub fn generate_id(&self, resource_identifier: &str) -> String {
        identifier::generate_id(
            self.request.stack_id.as_deref(),
            self.request.logical_resource_identifier.as_deref(),
            resource_identifier,
        )
    }

    pub fn generate_id_read_only(&self) -> String {
        identifier::generate_id_read_only(
            self.request.stack_id.as_deref(),
            self.request.logical_resource_identifier.as_deref(),
        )
    }

    /// A request without an identifier refers to a resource which was never created.
    pub fn validate_identifier(&self, primary_identifier: Option<&str>) -> Result<String, HandlerError> {
        primary_identifier
            .map(str::to_string)
            .ok_or_else(|| HandlerError::not_found(self.type_name(), "<none>"))
    }

    pub async fn create_resource<T>(
        &mut self,
        primary_identifier: Option<&str>,
        body: impl AsyncFnOnce(&mut Self, &mut CreateSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let guard: RecordGuard = self.guard.clone();
        let reinvocation: bool = self.callback_context.flag(CREATE_IN_FLIGHT);

        let mut session: CreateSession<M> =
            guard.begin_create(primary_identifier, reinvocation).await?;
        self.callback_context.set_flag(CREATE_IN_FLIGHT);

        let outcome: Result<T, Error> = body(self, &mut session).await;
        finish(session, outcome).await
    }

    pub async fn read_resource<T>(
        &mut self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut Self, &mut RecordSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let guard: RecordGuard = self.guard.clone();
        let mut session: RecordSession<M> = guard.begin_read(primary_identifier).await?;

        let outcome: Result<T, Error> = body(self, &mut session).await;
        finish(session, outcome).await
    }

    pub async fn update_resource<T>(
        &mut self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut Self, &mut RecordSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let guard: RecordGuard = self.guard.clone();
        let mut session: RecordSession<M> = guard.begin_update(primary_identifier).await?;

        let outcome: Result<T, Error> = body(self, &mut session).await;
        finish(session, outcome).await
    }

    pub async fn delete_resource<T>(
        &mut self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut Self, &mut DeleteSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let guard: RecordGuard = self.guard.clone();
        let mut session: DeleteSession<M> = guard.begin_delete(primary_identifier).await?;

        let outcome: Result<T, Error> = body(self, &mut session).await;
        finish(session, outcome).await
    }

    pub async fn list_identifiers(&self) -> Result<Vec<String>, HandlerError> {
        self.guard.list_identifiers().await
    }

    /// Run the checks until stable.
    ///
    /// Returns `None` once every check passes, otherwise the in-progress event
    /// to hand back to CloudFormation.
    pub async fn run_with_stabilization(
        &mut self,
        checks: &mut [&mut dyn StabilizationCheck],
        retry_sleep: Duration,
        in_progress_model: Option<M>,
    ) -> Result<Option<ProgressEvent<M>>, Error> {
        let stabilization: Stabilization = stabilization::run_with_stabilization(
            &self.tracker,
            &mut self.callback_context,
            checks,
            retry_sleep,
        )
        .await?;

        match stabilization {
            Stabilization::Stable => Ok(None),
            Stabilization::InProgress => Ok(Some(self.in_progress(
                "Waiting for the resource to stabilize",
                0,
                in_progress_model,
            ))),
        }
    }

    pub fn save_model_to_callback(&mut self, model: &M) -> Result<(), Error> {
        self.callback_context
            .insert(SAVED_MODEL, serde_json::to_value(model)?);

        Ok(())
    }

    pub fn model_from_callback(&self) -> Result<M, HandlerError> {
        let saved = self.callback_context.get(SAVED_MODEL).ok_or_else(|| {
            HandlerError::InternalFailure("No model was saved to the callback context".to_string())
        })?;

        serde_json::from_value(saved.clone()).map_err(|err| {
            tracing::error!("Saved model is unreadable: {err}");
            HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
        })
    }

    pub fn success(&self, model: M) -> ProgressEvent<M> {
        ProgressEvent::success(Some(model))
    }

    pub fn success_delete(&self) -> ProgressEvent<M> {
        ProgressEvent::success(None)
    }

    pub fn success_list(&self, models: Vec<M>) -> ProgressEvent<M> {
        ProgressEvent::success_list(models)
    }

    /// Yield, asking to be invoked again with the current callback context.
    pub fn in_progress(
        &self,
        message: &str,
        callback_delay_seconds: u32,
        model: Option<M>,
    ) -> ProgressEvent<M> {
        tracing::info!("Yielding: {message}");

        ProgressEvent::in_progress(
            message,
            callback_delay_seconds,
            self.callback_context.clone(),
            model,
        )
    }

    pub fn failed(&self, error: HandlerError) -> ProgressEvent<M> {
        error.into_progress_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtensionConfig;
    use crate::timeout::{HANDLER_ENTRY_TIME, RESOURCE_END_TIME};
    use async_trait::async_trait;
    use model::{HandlerErrorCode, OperationStatus};
    use state_in_memory::InMemoryRecordStore;
    use std::io;
    use std::sync::Arc;
    use test_utils::{ManualClock, TEST_LOGICAL_ID, TEST_STACK_ID, TestModel, stack_request};

    struct NeverStable;

    #[async_trait(?Send)]
    impl StabilizationCheck for NeverStable {
        async fn is_stable(&mut self, _context: &mut CallbackContext) -> Result<bool, Error> {
            Ok(false)
        }
    }

    fn runtime(clock: &Arc<ManualClock>) -> ExtensionRuntime {
        ExtensionRuntime::new(
            "Test::Resource::Thing",
            Arc::new(InMemoryRecordStore::new()),
            ExtensionConfig::default(),
            5,
        )
        .with_clock(clock.clone())
    }

    fn enter(runtime: &ExtensionRuntime, context: Option<CallbackContext>) -> HandlerContext<TestModel> {
        HandlerContext::enter(
            runtime,
            stack_request(Some(TestModel::named("thing"))),
            context,
        )
    }

    #[test]
    fn entering_marks_both_clocks() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let handler = enter(&runtime(&clock), None);

        assert!(handler.callback_context().contains(HANDLER_ENTRY_TIME));
        assert!(handler.callback_context().contains(RESOURCE_END_TIME));
    }

    #[test]
    fn identifiers_come_from_the_request() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let handler = enter(&runtime(&clock), None);

        assert_eq!(
            format!("{TEST_STACK_ID}|{TEST_LOGICAL_ID}|abc"),
            handler.generate_id("abc")
        );
        assert_eq!(
            format!("{TEST_STACK_ID}|{TEST_LOGICAL_ID}"),
            handler.generate_id_read_only()
        );
    }

    #[test]
    fn missing_identifier_is_not_found() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let handler = enter(&runtime(&clock), None);

        let err: HandlerError = handler
            .validate_identifier(None)
            .expect_err("Missing identifier should fail");

        assert!(matches!(err, HandlerError::NotFound { .. }));
    }

    #[test]
    fn model_stash_survives_the_callback_context() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let runtime: ExtensionRuntime = runtime(&clock);
        let mut handler = enter(&runtime, None);

        handler
            .save_model_to_callback(&TestModel::named("stashed"))
            .expect("Model should serialize");
        let event: ProgressEvent<TestModel> = handler.in_progress("Waiting", 2, None);

        let next = enter(&runtime, event.callback_context);
        assert_eq!(
            TestModel::named("stashed"),
            next.model_from_callback().expect("Model should be saved")
        );
    }

    #[tokio::test]
    async fn continued_create_is_not_a_duplicate() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let runtime: ExtensionRuntime = runtime(&clock);
        let mut first = enter(&runtime, None);

        let event: ProgressEvent<TestModel> = first
            .create_resource(None, async |handler, session| {
                session.set_resource_created("a|b|c", TestModel::named("thing"));
                Ok(handler.in_progress("Created, stabilizing", 4, None))
            })
            .await
            .expect("First create should succeed");
        assert!(event
            .callback_context
            .as_ref()
            .is_some_and(|context| context.flag(CREATE_IN_FLIGHT)));

        let mut continued = enter(&runtime, event.callback_context);
        continued
            .create_resource(Some("a|b|c"), async |_, _| Ok(()))
            .await
            .expect("Continued create should succeed");

        let mut fresh = enter(&runtime, None);
        let err: HandlerError = fresh
            .create_resource(Some("a|b|c"), async |_, _| Ok(()))
            .await
            .expect_err("Fresh create should fail");
        assert!(matches!(err, HandlerError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stabilization_yields_in_progress_with_context() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let mut handler = enter(&runtime(&clock), None);
        handler.callback_context_mut().set_flag("_create_group");

        let event: ProgressEvent<TestModel> = handler
            .run_with_stabilization(
                &mut [&mut NeverStable],
                Duration::from_secs(10),
                Some(TestModel::named("thing")),
            )
            .await
            .expect("Stabilization should not fail")
            .expect("Stabilization should yield");

        assert_eq!(OperationStatus::InProgress, event.status);
        assert_eq!(Some(TestModel::named("thing")), event.resource_model);
        assert!(event
            .callback_context
            .is_some_and(|context| context.flag("_create_group")));
    }

    #[tokio::test]
    async fn stabilization_past_operation_deadline_fails() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let runtime: ExtensionRuntime = runtime(&clock);
        let first = enter(&runtime, None);
        clock.advance(Duration::from_secs(6 * 60));
        let mut late = enter(&runtime, Some(first.callback_context().clone()));

        let err: Error = late
            .run_with_stabilization(&mut [&mut NeverStable], Duration::from_secs(10), None)
            .await
            .expect_err("Operation should have timed out");

        let handler_error: &HandlerError = err
            .downcast_ref::<HandlerError>()
            .expect("Timeout should be a handler error");
        assert_eq!(HandlerErrorCode::NotStabilized, handler_error.error_code());
    }

    #[tokio::test]
    async fn unrecognised_error_in_session_is_internal_failure() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let runtime: ExtensionRuntime = runtime(&clock);
        let mut handler = enter(&runtime, None);
        handler
            .create_resource(None, async |_, session| {
                session.set_resource_created("a|b|c", TestModel::named("thing"));
                Ok(())
            })
            .await
            .expect("Create should succeed");

        let err: HandlerError = handler
            .update_resource("a|b|c", async |_, _| {
                Err::<(), Error>(io::Error::other("token expired").into())
            })
            .await
            .expect_err("Update should fail");

        assert_eq!(HandlerErrorCode::InternalFailure, err.error_code());
        assert_eq!(
            ProgressEvent::<TestModel>::failed(HandlerErrorCode::InternalFailure, INTERNAL_FAILURE_MESSAGE)
                .message,
            handler.failed(err).message
        );
    }

    #[tokio::test]
    async fn downstream_handler_copies_context() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at_epoch());
        let runtime: ExtensionRuntime = runtime(&clock);
        let mut handler = enter(&runtime, None);
        handler.callback_context_mut().set_flag("_delete_group");

        let mut downstream = handler.downstream().with_desired_model(TestModel::named("next"));
        downstream.callback_context_mut().set_flag("_read_only");

        assert!(downstream.callback_context().flag("_delete_group"));
        assert!(!handler.callback_context().flag("_read_only"));
        assert_eq!(
            Some(&TestModel::named("next")),
            downstream.desired_model().ok()
        );
    }
}
