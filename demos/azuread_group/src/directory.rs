use async_trait::async_trait;
use model::Error;
use std::fmt;
use std::sync::Arc;

/// App registration credentials for a tenant.
#[derive(Clone, PartialEq)]
pub struct DirectoryCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for DirectoryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub display_name: String,
    pub description: Option<String>,
    /// Directory ids of the owning users
    pub owner_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryGroup {
    pub id: String,
    pub display_name: String,
    pub group_types: Vec<String>,
}

/// Group management in an Azure AD tenant.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Fails when the credentials are rejected by the tenant.
    async fn validate_credentials(&self) -> Result<(), Error>;

    async fn find_user_id(&self, user_principal_name: &str) -> Result<String, Error>;

    /// Returns the directory id of the new group.
    async fn create_group(&self, group: &NewGroup) -> Result<String, Error>;

    async fn get_group(&self, group_id: &str) -> Result<DirectoryGroup, Error>;

    async fn exists_by_name(&self, display_name: &str) -> Result<bool, Error>;

    async fn delete_group(&self, group_id: &str) -> Result<(), Error>;
}

/// Opens a directory session for a set of credentials.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &DirectoryCredentials,
    ) -> Result<Arc<dyn GroupDirectory>, Error>;
}
