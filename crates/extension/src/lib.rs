use crate::error::sanitize_response;
use crate::handler::HandlerContext;
use crate::runtime::ExtensionRuntime;
use async_trait::async_trait;
use lambda_runtime::tracing::{Instrument, Span};
use lambda_runtime::{LambdaEvent, tracing};
use model::{Action, Error, ProgressEvent, ProviderEvent, ResourceModel};

pub mod config;
pub mod error;
pub mod handler;
pub mod identifier;
pub mod lifecycle;
pub mod runtime;
pub mod stabilization;
pub mod timeout;

pub use crate::config::{ConfigError, ExtensionConfig};
pub use crate::error::HandlerError;
pub use crate::stabilization::{ConsecutiveObservations, StabilizationCheck};

/// The handlers of one resource type.
///
/// Each receives a freshly entered [`HandlerContext`] and returns the single
/// progress event of the invocation. Errors are reported to CloudFormation as
/// a failed event.
#[async_trait(?Send)]
pub trait ResourceProvider<M: ResourceModel> {
    async fn create(&self, handler: HandlerContext<M>) -> Result<ProgressEvent<M>, Error>;

    async fn read(&self, handler: HandlerContext<M>) -> Result<ProgressEvent<M>, Error>;

    async fn update(&self, handler: HandlerContext<M>) -> Result<ProgressEvent<M>, Error>;

    async fn delete(&self, handler: HandlerContext<M>) -> Result<ProgressEvent<M>, Error>;

    /// Every complete resource of this type, as models carrying only their identifier.
    async fn list(&self, handler: HandlerContext<M>) -> Result<ProgressEvent<M>, Error> {
        let identifiers: Vec<String> = handler.list_identifiers().await?;

        Ok(handler.success_list(
            identifiers
                .into_iter()
                .map(M::from_primary_identifier)
                .collect(),
        ))
    }
}

/// Handle a CloudFormation resource event, designed for use with `lambda_runtime::run()`
///
/// ```no_compile
/// use extension::runtime::ExtensionRuntime;
/// use extension::{ExtensionConfig, resource_fn};
/// use lambda_runtime::service_fn;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let runtime = ExtensionRuntime::new("Example::Resource::Thing", store, ExtensionConfig::from_env()?, 2);
///     let provider = ExampleProvider::default();
///
///     lambda_runtime::run(service_fn(|event| resource_fn(&runtime, &provider, event))).await
/// }
/// ```
pub async fn resource_fn<M, P>(
    runtime: &ExtensionRuntime,
    provider: &P,
    event: LambdaEvent<ProviderEvent<M>>,
) -> Result<ProgressEvent<M>, Error>
where
    M: ResourceModel,
    P: ResourceProvider<M>,
{
    let (event, _context) = event.into_parts();

    Ok(handle_event(runtime, provider, event).await)
}

/// Dispatch an event to the provider. Always produces a progress event.
pub async fn handle_event<M, P>(
    runtime: &ExtensionRuntime,
    provider: &P,
    event: ProviderEvent<M>,
) -> ProgressEvent<M>
where
    M: ResourceModel,
    P: ResourceProvider<M>,
{
    let action: Action = event.action;
    let type_name: &str = runtime.type_name();
    let span: Span = tracing::span!(tracing::Level::INFO, "Resource", type_name, action = ?action);

    let handler: HandlerContext<M> =
        HandlerContext::enter(runtime, event.request, event.callback_context);

    let outcome: Result<ProgressEvent<M>, Error> = async {
        tracing::info!("Handling {action:?}");

        match action {
            Action::Create => provider.create(handler).await,
            Action::Read => provider.read(handler).await,
            Action::Update => provider.update(handler).await,
            Action::Delete => provider.delete(handler).await,
            Action::List => provider.list(handler).await,
        }
    }
    .instrument(span)
    .await;

    match outcome {
        Ok(progress) => {
            tracing::info!("Finished {action:?} with status {:?}", progress.status);
            progress
        }
        Err(err) => {
            let error: HandlerError = sanitize_response(err);
            tracing::info!("Finished {action:?} with error {error}");

            error.into_progress_event()
        }
    }
}
