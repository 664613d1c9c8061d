use async_trait::async_trait;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemOutput;
use aws_sdk_dynamodb::operation::get_item::GetItemOutput;
use aws_sdk_dynamodb::operation::put_item::PutItemOutput;
use aws_sdk_dynamodb::operation::query::QueryOutput;
use aws_smithy_mocks::{Rule, RuleMode, mock, mock_client};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use model::env::{
    EXTENSION_HANDLER_TIMEOUT_SECONDS, EXTENSION_PLATFORM_TIMEOUT_SECONDS, EXTENSION_TABLE_NAME,
};
use model::{Action, CallbackContext, Clock, HandlerRequest, ProviderEvent, ResourceModel};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A clock which only moves when told to.
/// Sleeping advances the clock by the requested duration instead of waiting.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    reads: AtomicUsize,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
            reads: AtomicUsize::new(0),
        }
    }

    /// A clock starting at a fixed, arbitrary instant.
    pub fn starting_at_epoch() -> Self {
        Self::new(test_epoch())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
    }

    /// How many times `now` has been read.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Minimal resource model used across crate tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestModel {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

impl TestModel {
    pub fn named(name: &str) -> Self {
        TestModel {
            id: None,
            name: name.to_string(),
        }
    }
}

impl ResourceModel for TestModel {
    fn primary_identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn from_primary_identifier(primary_identifier: String) -> Self {
        TestModel {
            id: Some(primary_identifier),
            name: String::new(),
        }
    }
}

pub const TEST_STACK_ID: &str =
    "arn:aws:cloudformation:eu-west-2:123456789012:stack/test-stack/0a1b2c3d";
pub const TEST_LOGICAL_ID: &str = "TestResource";
pub const TEST_TABLE: &str = "extension-records";

/// A request as CloudFormation sends it from inside a stack.
pub fn stack_request<M>(desired: Option<M>) -> HandlerRequest<M> {
    HandlerRequest {
        client_request_token: "token-1".to_string(),
        stack_id: Some(TEST_STACK_ID.to_string()),
        logical_resource_identifier: Some(TEST_LOGICAL_ID.to_string()),
        aws_account_id: Some("123456789012".to_string()),
        region: Some("eu-west-2".to_string()),
        aws_partition: Some("aws".to_string()),
        ..HandlerRequest::new(desired)
    }
}

pub fn provider_event<M>(
    action: Action,
    request: HandlerRequest<M>,
    callback_context: Option<CallbackContext>,
) -> ProviderEvent<M> {
    ProviderEvent {
        action,
        request,
        callback_context,
    }
}

/// A mock DynamoDB client where every record operation succeeds and nothing is stored
pub fn create_mock_dynamodb_client() -> aws_sdk_dynamodb::Client {
    let put_rule: Rule = mock!(aws_sdk_dynamodb::Client::put_item)
        .match_requests(|_| true)
        .sequence()
        .output(|| PutItemOutput::builder().build())
        .repeatedly()
        .build();
    let get_rule: Rule = mock!(aws_sdk_dynamodb::Client::get_item)
        .match_requests(|_| true)
        .sequence()
        .output(|| GetItemOutput::builder().build())
        .repeatedly()
        .build();
    let delete_rule: Rule = mock!(aws_sdk_dynamodb::Client::delete_item)
        .match_requests(|_| true)
        .sequence()
        .output(|| DeleteItemOutput::builder().build())
        .repeatedly()
        .build();
    let query_rule: Rule = mock!(aws_sdk_dynamodb::Client::query)
        .match_requests(|_| true)
        .sequence()
        .output(|| QueryOutput::builder().build())
        .repeatedly()
        .build();

    mock_client!(
        aws_sdk_dynamodb,
        RuleMode::MatchAny,
        [&put_rule, &get_rule, &delete_rule, &query_rule]
    )
}

/// Setup default environment variables used in testing
pub fn setup_default_env() {
    unsafe {
        env::set_var(EXTENSION_TABLE_NAME, TEST_TABLE);
        env::remove_var(EXTENSION_HANDLER_TIMEOUT_SECONDS);
        env::remove_var(EXTENSION_PLATFORM_TIMEOUT_SECONDS);
    }
}
