use lambda_runtime::tracing;
use model::{Error, HandlerErrorCode, ProgressEvent};
use thiserror::Error;

/// Message returned to CloudFormation in place of an unrecognised error.
pub const INTERNAL_FAILURE_MESSAGE: &str =
    "Internal failure in the resource handler, see the handler logs for details";

/// Errors which a resource handler reports back to CloudFormation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Resource {identifier} of type {type_name} was not found")]
    NotFound {
        type_name: String,
        identifier: String,
    },

    #[error("Resource {identifier} of type {type_name} already exists")]
    AlreadyExists {
        type_name: String,
        identifier: String,
    },

    /// The whole operation, across every invocation, ran out of time.
    #[error("Timed out waiting for resource of type {type_name} to stabilize")]
    ResourceTimeout { type_name: String },

    #[error("{0}")]
    InternalFailure(String),

    #[error("Malformed resource identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HandlerError {
    pub fn not_found(type_name: &str, identifier: &str) -> Self {
        HandlerError::NotFound {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
        }
    }

    pub fn already_exists(type_name: &str, identifier: &str) -> Self {
        HandlerError::AlreadyExists {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
        }
    }

    pub fn error_code(&self) -> HandlerErrorCode {
        match self {
            HandlerError::NotFound { .. } => HandlerErrorCode::NotFound,
            HandlerError::AlreadyExists { .. } => HandlerErrorCode::AlreadyExists,
            HandlerError::ResourceTimeout { .. } => HandlerErrorCode::NotStabilized,
            HandlerError::InvalidRequest(_) => HandlerErrorCode::InvalidRequest,
            HandlerError::InternalFailure(_) | HandlerError::MalformedIdentifier(_) => {
                HandlerErrorCode::InternalFailure
            }
        }
    }

    /// Whether the error may be shown to CloudFormation as is.
    fn is_reportable(&self) -> bool {
        matches!(
            self,
            HandlerError::NotFound { .. }
                | HandlerError::AlreadyExists { .. }
                | HandlerError::ResourceTimeout { .. }
                | HandlerError::InternalFailure(_)
        )
    }

    pub fn into_progress_event<M>(self) -> ProgressEvent<M> {
        ProgressEvent::failed(self.error_code(), self.to_string())
    }
}

/// Reduce any error raised inside a record session to one CloudFormation may see.
///
/// Lifecycle errors pass through untouched. Anything else is logged in full
/// and replaced with a generic internal failure.
pub fn sanitize(error: Error) -> HandlerError {
    match error.downcast::<HandlerError>() {
        Ok(handler_error) if handler_error.is_reportable() => *handler_error,
        Ok(handler_error) => {
            tracing::error!("Unexpected error in resource handler: {handler_error}");
            HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
        }
        Err(other) => {
            tracing::error!("Unexpected error in resource handler: {other:?}");
            HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
        }
    }
}

/// Like [`sanitize`] but keeps errors raised by the handler itself outside
/// of a record session, such as an invalid request.
pub(crate) fn sanitize_response(error: Error) -> HandlerError {
    match error.downcast::<HandlerError>() {
        Ok(handler_error) => match *handler_error {
            HandlerError::InvalidRequest(message) => HandlerError::InvalidRequest(message),
            other => sanitize(Box::new(other)),
        },
        Err(other) => sanitize(other),
    }
}
