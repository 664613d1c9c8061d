use crate::directory::DirectoryCredentials;
use extension::HandlerError;
use model::ResourceModel;
use serde::{Deserialize, Serialize};

/// The only owner type a group can currently be created with.
pub const USER_OWNER: &str = "USER";
/// Reported type of a group without any group types set.
pub const SECURITY_GROUP: &str = "SECURITY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<Vec<Owner>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_app_client_id: Option<String>,
    #[serde(
        rename = "CredentialAppAPIToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub credential_app_api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Owner {
    #[serde(default)]
    pub owner_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ResourceModel for GroupModel {
    fn primary_identifier(&self) -> Option<&str> {
        self.generated_id.as_deref()
    }

    fn from_primary_identifier(primary_identifier: String) -> Self {
        GroupModel {
            generated_id: Some(primary_identifier),
            ..GroupModel::default()
        }
    }
}

impl GroupModel {
    pub fn credentials(&self) -> Result<DirectoryCredentials, HandlerError> {
        match (
            &self.credential_tenant_id,
            &self.credential_app_client_id,
            &self.credential_app_api_token,
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Ok(DirectoryCredentials {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(HandlerError::InvalidRequest(
                "The group model is missing its credentials".to_string(),
            )),
        }
    }

    pub fn required_group_name(&self) -> Result<&str, HandlerError> {
        self.group_name
            .as_deref()
            .ok_or_else(|| HandlerError::InvalidRequest("GroupName is required".to_string()))
    }

    /// Names of the users owning the group. Only user owners are supported.
    pub fn owner_names(&self) -> Result<Vec<&str>, HandlerError> {
        self.owners
            .iter()
            .flatten()
            .map(|owner| match (owner.owner_type.as_deref(), owner.name.as_deref()) {
                (Some(USER_OWNER), Some(name)) => Ok(name),
                (owner_type, _) => Err(HandlerError::InvalidRequest(format!(
                    "Cannot support owner type {}",
                    owner_type.unwrap_or("<none>")
                ))),
            })
            .collect()
    }

    /// The model as reported back to CloudFormation, without write-only properties.
    pub fn without_credentials(self) -> Self {
        GroupModel {
            credential_app_client_id: None,
            credential_app_api_token: None,
            credential_tenant_id: None,
            ..self
        }
    }
}
