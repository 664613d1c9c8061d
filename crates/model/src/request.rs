use crate::callback::CallbackContext;
use serde::{Deserialize, Serialize};

/// The lifecycle event CloudFormation is asking a handler to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
}

/// The request handed to a resource handler.
///
/// CloudFormation does not guarantee every field, contract tests in particular
/// omit the stack and logical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRequest<M> {
    #[serde(default)]
    pub client_request_token: String,
    #[serde(default = "Option::default")]
    pub desired_resource_state: Option<M>,
    #[serde(default = "Option::default")]
    pub previous_resource_state: Option<M>,
    #[serde(default)]
    pub logical_resource_identifier: Option<String>,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub aws_account_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub aws_partition: Option<String>,
    #[serde(default)]
    pub next_token: Option<String>,
}

impl<M> HandlerRequest<M> {
    pub fn new(desired_resource_state: Option<M>) -> Self {
        HandlerRequest {
            client_request_token: String::new(),
            desired_resource_state,
            previous_resource_state: None,
            logical_resource_identifier: None,
            stack_id: None,
            aws_account_id: None,
            region: None,
            aws_partition: None,
            next_token: None,
        }
    }
}

/// The Lambda payload: an action, its request and the callback context
/// returned by the previous invocation of the same operation, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent<M> {
    pub action: Action,
    pub request: HandlerRequest<M>,
    #[serde(default)]
    pub callback_context: Option<CallbackContext>,
}
