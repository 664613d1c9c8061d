use crate::callback::CallbackContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Failed,
    InProgress,
}

/// Error codes understood by CloudFormation on a failed progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerErrorCode {
    NotFound,
    AlreadyExists,
    NotStabilized,
    InvalidRequest,
    InternalFailure,
}

/// The single response of one handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent<M> {
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<HandlerErrorCode>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_context: Option<CallbackContext>,
    #[serde(default)]
    pub callback_delay_seconds: u32,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub resource_model: Option<M>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub resource_models: Option<Vec<M>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl<M> ProgressEvent<M> {
    fn with_status(status: OperationStatus) -> Self {
        ProgressEvent {
            status,
            error_code: None,
            message: String::new(),
            callback_context: None,
            callback_delay_seconds: 0,
            resource_model: None,
            resource_models: None,
            next_token: None,
        }
    }

    /// Terminal success, optionally carrying the resource's current model.
    pub fn success(resource_model: Option<M>) -> Self {
        ProgressEvent {
            resource_model,
            ..Self::with_status(OperationStatus::Success)
        }
    }

    pub fn success_list(resource_models: Vec<M>) -> Self {
        ProgressEvent {
            resource_models: Some(resource_models),
            ..Self::with_status(OperationStatus::Success)
        }
    }

    /// Ask CloudFormation to invoke the same operation again after a delay,
    /// handing back the given callback context.
    pub fn in_progress(
        message: impl Into<String>,
        callback_delay_seconds: u32,
        callback_context: CallbackContext,
        resource_model: Option<M>,
    ) -> Self {
        ProgressEvent {
            message: message.into(),
            callback_delay_seconds,
            callback_context: Some(callback_context),
            resource_model,
            ..Self::with_status(OperationStatus::InProgress)
        }
    }

    pub fn failed(error_code: HandlerErrorCode, message: impl Into<String>) -> Self {
        ProgressEvent {
            error_code: Some(error_code),
            message: message.into(),
            ..Self::with_status(OperationStatus::Failed)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OperationStatus::InProgress
    }
}
