use crate::lookup::{GroupLookup, find_group_id};
use async_trait::async_trait;
use extension::handler::HandlerContext;
use extension::runtime::ExtensionRuntime;
use extension::{ExtensionConfig, HandlerError, ResourceProvider};
use model::{Error, ProgressEvent, ResourceModel};
use serde::{Deserialize, Serialize};
use state_dynamodb::DynamoDbRecordStore;
use std::sync::Arc;

pub mod lookup;

pub const TYPE_NAME: &str = "Dotmatics::SSO::GroupInfo";
/// Should match the handler timeouts declared in the resource schema
pub const TOTAL_TIMEOUT_MINUTES: u32 = 2;

/// Read-only view of an Identity Center group, looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_read_only_id: Option<String>,
}

impl ResourceModel for GroupInfo {
    fn primary_identifier(&self) -> Option<&str> {
        self.generated_read_only_id.as_deref()
    }

    fn from_primary_identifier(primary_identifier: String) -> Self {
        GroupInfo {
            generated_read_only_id: Some(primary_identifier),
            ..GroupInfo::default()
        }
    }
}

impl GroupInfo {
    fn search_terms(&self) -> Result<(&str, &str), HandlerError> {
        match (self.identity_store_id.as_deref(), self.group_name.as_deref()) {
            (Some(identity_store_id), Some(group_name)) => Ok((identity_store_id, group_name)),
            _ => Err(HandlerError::InvalidRequest(
                "IdentityStoreId and GroupName are required".to_string(),
            )),
        }
    }
}

pub struct GroupInfoProvider {
    lookup: Box<dyn GroupLookup>,
}

impl GroupInfoProvider {
    pub fn new(lookup: Box<dyn GroupLookup>) -> Self {
        GroupInfoProvider { lookup }
    }

    async fn current_group_id(&self, type_name: &str, model: &GroupInfo) -> Result<String, Error> {
        let (identity_store_id, group_name) = model.search_terms()?;

        find_group_id(self.lookup.as_ref(), type_name, identity_store_id, group_name).await
    }
}

#[async_trait(?Send)]
impl ResourceProvider<GroupInfo> for GroupInfoProvider {
    async fn create(
        &self,
        mut handler: HandlerContext<GroupInfo>,
    ) -> Result<ProgressEvent<GroupInfo>, Error> {
        let mut model: GroupInfo = handler.desired_model()?.clone();
        model.search_terms()?;
        let identifier: String = handler.generate_id_read_only();

        let model: GroupInfo = handler
            .create_resource(Some(&identifier), async |handler, session| {
                model.group_id = Some(self.current_group_id(handler.type_name(), &model).await?);
                model.generated_read_only_id = Some(identifier.clone());

                session.set_resource_created(identifier.clone(), model.clone());
                Ok(model)
            })
            .await?;

        self.read(handler.downstream().with_desired_model(model))
            .await
    }

    async fn read(
        &self,
        mut handler: HandlerContext<GroupInfo>,
    ) -> Result<ProgressEvent<GroupInfo>, Error> {
        let identifier: String = handler.validate_identifier(
            handler.desired_model()?.generated_read_only_id.as_deref(),
        )?;

        let model: GroupInfo = handler
            .read_resource(&identifier, async |handler, session| {
                // Only the stored model is guaranteed to carry the search terms
                let stored: GroupInfo = session.read_model();
                let group_id: String = self.current_group_id(handler.type_name(), &stored).await?;

                Ok(GroupInfo {
                    group_id: Some(group_id),
                    ..stored
                })
            })
            .await?;

        Ok(handler.success(model))
    }

    async fn update(
        &self,
        mut handler: HandlerContext<GroupInfo>,
    ) -> Result<ProgressEvent<GroupInfo>, Error> {
        let mut desired: GroupInfo = handler.desired_model()?.clone();
        let identifier: String =
            handler.validate_identifier(desired.generated_read_only_id.as_deref())?;

        let model: GroupInfo = handler
            .update_resource(&identifier, async |handler, session| {
                desired.group_id = Some(self.current_group_id(handler.type_name(), &desired).await?);
                desired.generated_read_only_id = Some(identifier.clone());

                session.update_model(desired.clone());
                Ok(desired)
            })
            .await?;

        self.read(handler.downstream().with_desired_model(model))
            .await
    }

    async fn delete(
        &self,
        mut handler: HandlerContext<GroupInfo>,
    ) -> Result<ProgressEvent<GroupInfo>, Error> {
        let identifier: String = handler.validate_identifier(
            handler.desired_model()?.generated_read_only_id.as_deref(),
        )?;

        handler
            .delete_resource(&identifier, async |_, session| {
                session.set_resource_deleted();
                Ok(())
            })
            .await?;

        Ok(handler.success_delete())
    }
}

/// Runtime backed by the DynamoDB record table.
pub fn dynamodb_runtime(
    dynamodb_client: aws_sdk_dynamodb::Client,
    config: ExtensionConfig,
) -> ExtensionRuntime {
    let store = DynamoDbRecordStore::new(dynamodb_client, config.table_name.clone());

    ExtensionRuntime::new(TYPE_NAME, Arc::new(store), config, TOTAL_TIMEOUT_MINUTES)
}
