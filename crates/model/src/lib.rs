use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

pub mod callback;
pub mod clock;
pub mod env;
pub mod progress;
pub mod request;

pub use callback::CallbackContext;
pub use clock::{Clock, SystemClock};
pub use progress::{HandlerErrorCode, OperationStatus, ProgressEvent};
pub use request::{Action, HandlerRequest, ProviderEvent};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// The statically typed model of one resource type.
///
/// Each resource type declares its own serde mapping, the store keeps the
/// serialized form opaque.
pub trait ResourceModel: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// The composite identifier carried on the model, once it has been generated.
    fn primary_identifier(&self) -> Option<&str>;

    /// A model carrying only its primary identifier, as returned from a list.
    fn from_primary_identifier(primary_identifier: String) -> Self;
}
