use aws_config::BehaviorVersion;
use extension::runtime::ExtensionRuntime;
use extension::{ExtensionConfig, resource_fn};
use lambda_runtime::{LambdaEvent, service_fn, tracing};
use model::{Error, ProviderEvent};
use sso_groupinfo::lookup::IdentityStoreGroupLookup;
use sso_groupinfo::{GroupInfo, GroupInfoProvider, dynamodb_runtime};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config: ExtensionConfig = ExtensionConfig::from_env()?;
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let runtime: ExtensionRuntime =
        dynamodb_runtime(aws_sdk_dynamodb::Client::new(&aws_config), config);
    let provider: GroupInfoProvider = GroupInfoProvider::new(Box::new(
        IdentityStoreGroupLookup::new(aws_sdk_identitystore::Client::new(&aws_config)),
    ));

    lambda_runtime::run(service_fn(
        |event: LambdaEvent<ProviderEvent<GroupInfo>>| resource_fn(&runtime, &provider, event),
    ))
    .await
}
