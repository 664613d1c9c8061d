use ::model::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};

/// Persist the records backing CloudFormation resources.
/// Records are keyed by resource type name and primary identifier.
///
/// A record is pending until the resource it describes has been created,
/// implementations must never return pending records from a list.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a record if none exists or the existing one is still pending.
    /// Fails with [`StateErrorReason::ConditionFailed`] when a complete record is present.
    async fn create_record(&self, record: ResourceRecord) -> Result<(), StateError>;

    async fn get_record(
        &self,
        type_name: &str,
        primary_identifier: &str,
    ) -> Result<Option<ResourceRecord>, StateError>;

    /// Overwrite an existing record.
    /// Fails with [`StateErrorReason::MissingEntry`] when there is nothing to update.
    async fn update_record(&self, record: ResourceRecord) -> Result<(), StateError>;

    /// Fails with [`StateErrorReason::MissingEntry`] when there is nothing to delete.
    async fn delete_record(&self, type_name: &str, primary_identifier: &str)
    -> Result<(), StateError>;

    /// Every complete record for the type name.
    async fn list_records(&self, type_name: &str) -> Result<Vec<ResourceRecord>, StateError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub type_name: String,
    pub primary_identifier: String,
    /// False while the resource is still being created.
    pub complete: bool,
    /// The serialized resource model.
    pub model: Value,
    /// RFC 3339 time of the last write, informational only.
    pub updated_at: String,
}

impl ResourceRecord {
    pub fn state_key(&self) -> String {
        state_key(&self.type_name, &self.primary_identifier)
    }
}

/// Key used to describe a record in errors and logs.
pub fn state_key(type_name: &str, primary_identifier: &str) -> String {
    format!("{type_name}/{primary_identifier}")
}

/// Errors arising from reading or writing records.
#[derive(Debug)]
pub struct StateError {
    pub state_key: String,

    pub operation: StateOperation,
    pub reason: StateErrorReason,
}

#[derive(Debug)]
pub enum StateErrorReason {
    // An expected record was missing
    MissingEntry,
    // A conditional write was rejected
    ConditionFailed,
    // The stored record was not of the expected shape
    BadState(String),
    // An error from the underlying store
    BackendFailure(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOperation {
    CreateRecord,
    GetRecord,
    UpdateRecord,
    DeleteRecord,
    ListRecords,
}

impl StateError {
    pub fn new(state_key: String, operation: StateOperation, reason: StateErrorReason) -> Self {
        StateError {
            state_key,
            operation,
            reason,
        }
    }
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(format!("{:?}", self).as_str())
    }
}

impl std::error::Error for StateError {}
