use async_trait::async_trait;
use aws_sdk_identitystore::operation::list_groups::ListGroupsOutput;
use aws_sdk_identitystore::types::Filter;
use extension::HandlerError;
use lambda_runtime::tracing;
use model::Error;

const DISPLAY_NAME: &str = "DisplayName";

/// Finds groups in an IAM Identity Center identity store.
#[async_trait]
pub trait GroupLookup: Send + Sync {
    /// Ids of every group whose display name matches exactly.
    async fn group_ids_by_name(
        &self,
        identity_store_id: &str,
        group_name: &str,
    ) -> Result<Vec<String>, Error>;
}

/// The id of the one group with the given name.
pub async fn find_group_id(
    lookup: &dyn GroupLookup,
    type_name: &str,
    identity_store_id: &str,
    group_name: &str,
) -> Result<String, Error> {
    let mut group_ids: Vec<String> = lookup
        .group_ids_by_name(identity_store_id, group_name)
        .await?;

    match group_ids.len() {
        0 => Err(HandlerError::not_found(type_name, group_name).into()),
        1 => Ok(group_ids.remove(0)),
        found => Err(HandlerError::InternalFailure(format!(
            "Found {found} groups named {group_name}, expected exactly one"
        ))
        .into()),
    }
}

pub struct IdentityStoreGroupLookup {
    identity_store_client: aws_sdk_identitystore::Client,
}

impl IdentityStoreGroupLookup {
    pub fn new(identity_store_client: aws_sdk_identitystore::Client) -> Self {
        IdentityStoreGroupLookup {
            identity_store_client,
        }
    }
}

#[async_trait]
impl GroupLookup for IdentityStoreGroupLookup {
    async fn group_ids_by_name(
        &self,
        identity_store_id: &str,
        group_name: &str,
    ) -> Result<Vec<String>, Error> {
        let filter: Filter = Filter::builder()
            .attribute_path(DISPLAY_NAME)
            .attribute_value(group_name)
            .build()?;

        tracing::debug!("Looking up group {group_name} in {identity_store_id}");

        let output: ListGroupsOutput = self
            .identity_store_client
            .list_groups()
            .identity_store_id(identity_store_id)
            .filters(filter)
            .send()
            .await?;

        Ok(output
            .groups()
            .iter()
            .map(|group| group.group_id().to_string())
            .collect())
    }
}
