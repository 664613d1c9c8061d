use async_trait::async_trait;
use state::StateErrorReason::{BackendFailure, ConditionFailed, MissingEntry};
use state::StateOperation::{CreateRecord, DeleteRecord, GetRecord, ListRecords, UpdateRecord};
use state::{RecordStore, ResourceRecord, StateError, StateOperation, state_key};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type RecordKey = (String, String);

/// Records held in process memory, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<Mutex<HashMap<RecordKey, ResourceRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
        key: &str,
        operation: StateOperation,
    ) -> Result<MutexGuard<'_, HashMap<RecordKey, ResourceRecord>>, StateError> {
        self.records.lock().map_err(|err| {
            StateError::new(
                key.to_string(),
                operation,
                BackendFailure(err.to_string().into()),
            )
        })
    }
}

fn record_key(type_name: &str, primary_identifier: &str) -> RecordKey {
    (type_name.to_string(), primary_identifier.to_string())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_record(&self, record: ResourceRecord) -> Result<(), StateError> {
        let key: String = record.state_key();
        let mut records = self.lock(&key, CreateRecord)?;

        let existing: Option<&ResourceRecord> =
            records.get(&record_key(&record.type_name, &record.primary_identifier));

        if existing.is_some_and(|existing| existing.complete) {
            return Err(StateError::new(key, CreateRecord, ConditionFailed));
        }

        records.insert(
            record_key(&record.type_name, &record.primary_identifier),
            record,
        );

        Ok(())
    }

    async fn get_record(
        &self,
        type_name: &str,
        primary_identifier: &str,
    ) -> Result<Option<ResourceRecord>, StateError> {
        let records = self.lock(&state_key(type_name, primary_identifier), GetRecord)?;

        Ok(records
            .get(&record_key(type_name, primary_identifier))
            .cloned())
    }

    async fn update_record(&self, record: ResourceRecord) -> Result<(), StateError> {
        let key: String = record.state_key();
        let mut records = self.lock(&key, UpdateRecord)?;

        match records.get_mut(&record_key(&record.type_name, &record.primary_identifier)) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StateError::new(key, UpdateRecord, MissingEntry)),
        }
    }

    async fn delete_record(
        &self,
        type_name: &str,
        primary_identifier: &str,
    ) -> Result<(), StateError> {
        let key: String = state_key(type_name, primary_identifier);
        let mut records = self.lock(&key, DeleteRecord)?;

        records
            .remove(&record_key(type_name, primary_identifier))
            .map(|_| ())
            .ok_or_else(|| StateError::new(key, DeleteRecord, MissingEntry))
    }

    async fn list_records(&self, type_name: &str) -> Result<Vec<ResourceRecord>, StateError> {
        let records = self.lock(type_name, ListRecords)?;

        Ok(records
            .values()
            .filter(|record| record.type_name == type_name && record.complete)
            .cloned()
            .collect())
    }
}
