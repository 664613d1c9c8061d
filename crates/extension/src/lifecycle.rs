//! The lifecycle of the record backing each resource.
//!
//! A record is absent, pending or complete. Create moves it to complete,
//! delete removes it, and only complete records can be read, updated or
//! listed. All access goes through a session which writes nothing unless the
//! work done inside it succeeds.

use crate::error::{HandlerError, INTERNAL_FAILURE_MESSAGE, sanitize};
use async_trait::async_trait;
use lambda_runtime::tracing;
use model::{Clock, Error, ResourceModel};
use serde_json::Value;
use state::{RecordStore, ResourceRecord, StateError, StateErrorReason};
use std::sync::Arc;

#[derive(Clone)]
pub struct RecordGuard {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    type_name: String,
}

impl RecordGuard {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, type_name: &str) -> Self {
        RecordGuard {
            store,
            clock,
            type_name: type_name.to_string(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Open a create session.
    ///
    /// When the identifier is known up front an existing complete record
    /// fails fast, unless this invocation continues a create which is already
    /// in flight. Without an identifier the check happens when the record is
    /// written.
    pub async fn begin_create<M: ResourceModel>(
        &self,
        primary_identifier: Option<&str>,
        reinvocation: bool,
    ) -> Result<CreateSession<M>, HandlerError> {
        if let Some(identifier) = primary_identifier {
            match self.load(identifier).await? {
                Some(record) if record.complete && !reinvocation => {
                    tracing::info!("Refusing to create {identifier}, it already exists");
                    return Err(HandlerError::already_exists(&self.type_name, identifier));
                }
                Some(record) if !record.complete => {
                    tracing::info!("Continuing create of pending record {identifier}");
                }
                _ => {}
            }
        }

        Ok(CreateSession {
            guard: self.clone(),
            pending_write: None,
        })
    }

    pub async fn begin_read<M: ResourceModel>(
        &self,
        primary_identifier: &str,
    ) -> Result<RecordSession<M>, HandlerError> {
        self.begin_existing(primary_identifier).await
    }

    pub async fn begin_update<M: ResourceModel>(
        &self,
        primary_identifier: &str,
    ) -> Result<RecordSession<M>, HandlerError> {
        self.begin_existing(primary_identifier).await
    }

    pub async fn begin_delete<M: ResourceModel>(
        &self,
        primary_identifier: &str,
    ) -> Result<DeleteSession<M>, HandlerError> {
        let record: ResourceRecord = self
            .load(primary_identifier)
            .await?
            .ok_or_else(|| HandlerError::not_found(&self.type_name, primary_identifier))?;
        let model: M = self.parse_model(&record)?;

        Ok(DeleteSession {
            guard: self.clone(),
            primary_identifier: primary_identifier.to_string(),
            model,
            deleted: false,
        })
    }

    /// Identifiers of every complete record of this type, sorted.
    pub async fn list_identifiers(&self) -> Result<Vec<String>, HandlerError> {
        let records: Vec<ResourceRecord> = self
            .store
            .list_records(&self.type_name)
            .await
            .map_err(storage_failure)?;

        let mut identifiers: Vec<String> = records
            .into_iter()
            .filter(|record| record.complete)
            .map(|record| record.primary_identifier)
            .collect();
        identifiers.sort();

        Ok(identifiers)
    }

    /// Run `body` in a create session, writing its outcome only if it succeeds.
    pub async fn create<M: ResourceModel, T>(
        &self,
        primary_identifier: Option<&str>,
        reinvocation: bool,
        body: impl AsyncFnOnce(&mut CreateSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let mut session: CreateSession<M> =
            self.begin_create(primary_identifier, reinvocation).await?;
        let outcome: Result<T, Error> = body(&mut session).await;

        finish(session, outcome).await
    }

    pub async fn read<M: ResourceModel, T>(
        &self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut RecordSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let mut session: RecordSession<M> = self.begin_read(primary_identifier).await?;
        let outcome: Result<T, Error> = body(&mut session).await;

        finish(session, outcome).await
    }

    pub async fn update<M: ResourceModel, T>(
        &self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut RecordSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let mut session: RecordSession<M> = self.begin_update(primary_identifier).await?;
        let outcome: Result<T, Error> = body(&mut session).await;

        finish(session, outcome).await
    }

    pub async fn delete<M: ResourceModel, T>(
        &self,
        primary_identifier: &str,
        body: impl AsyncFnOnce(&mut DeleteSession<M>) -> Result<T, Error>,
    ) -> Result<T, HandlerError> {
        let mut session: DeleteSession<M> = self.begin_delete(primary_identifier).await?;
        let outcome: Result<T, Error> = body(&mut session).await;

        finish(session, outcome).await
    }

    async fn begin_existing<M: ResourceModel>(
        &self,
        primary_identifier: &str,
    ) -> Result<RecordSession<M>, HandlerError> {
        let record: ResourceRecord = self
            .load(primary_identifier)
            .await?
            .filter(|record| record.complete)
            .ok_or_else(|| HandlerError::not_found(&self.type_name, primary_identifier))?;
        let model: M = self.parse_model(&record)?;

        Ok(RecordSession {
            guard: self.clone(),
            record,
            model,
            updated: None,
        })
    }

    async fn load(&self, primary_identifier: &str) -> Result<Option<ResourceRecord>, HandlerError> {
        self.store
            .get_record(&self.type_name, primary_identifier)
            .await
            .map_err(storage_failure)
    }

    fn parse_model<M: ResourceModel>(&self, record: &ResourceRecord) -> Result<M, HandlerError> {
        serde_json::from_value(record.model.clone()).map_err(|err| {
            tracing::error!("Stored model of {} is unreadable: {err}", record.state_key());
            HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
        })
    }

    fn record<M: ResourceModel>(
        &self,
        primary_identifier: &str,
        model: &M,
        complete: bool,
    ) -> Result<ResourceRecord, HandlerError> {
        let model: Value = serde_json::to_value(model).map_err(|err| {
            tracing::error!("Model of {primary_identifier} cannot be serialized: {err}");
            HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
        })?;

        Ok(ResourceRecord {
            type_name: self.type_name.clone(),
            primary_identifier: primary_identifier.to_string(),
            complete,
            model,
            updated_at: self.clock.now().to_rfc3339(),
        })
    }
}

fn storage_failure(err: StateError) -> HandlerError {
    tracing::error!("Record store failure: {err}");
    HandlerError::InternalFailure(INTERNAL_FAILURE_MESSAGE.to_string())
}

/// A session whose recorded changes are written when it ends cleanly.
#[async_trait]
pub trait Commit: Send + Sized {
    async fn commit(self) -> Result<(), HandlerError>;
}

/// End a session: commit on success, write nothing on failure.
pub async fn finish<S: Commit, T>(session: S, outcome: Result<T, Error>) -> Result<T, HandlerError> {
    match outcome {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => Err(sanitize(err)),
    }
}

pub struct CreateSession<M> {
    guard: RecordGuard,
    pending_write: Option<(String, M, bool)>,
}

impl<M: ResourceModel> CreateSession<M> {
    /// Record that the resource now exists. Written as a complete record when the session ends.
    pub fn set_resource_created(&mut self, primary_identifier: impl Into<String>, model: M) {
        self.pending_write = Some((primary_identifier.into(), model, true));
    }

    /// Reserve the identifier while creation is still under way.
    /// A pending record is not visible to read, update or list.
    pub fn set_resource_pending(&mut self, primary_identifier: impl Into<String>, model: M) {
        self.pending_write = Some((primary_identifier.into(), model, false));
    }

    pub fn is_resource_created(&self) -> bool {
        self.pending_write
            .as_ref()
            .is_some_and(|(_, _, complete)| *complete)
    }
}

#[async_trait]
impl<M: ResourceModel> Commit for CreateSession<M> {
    async fn commit(self) -> Result<(), HandlerError> {
        let Some((primary_identifier, model, complete)) = self.pending_write else {
            return Ok(());
        };
        let record: ResourceRecord = self.guard.record(&primary_identifier, &model, complete)?;

        match self.guard.store.create_record(record).await {
            Ok(()) => {
                tracing::info!("Recorded {primary_identifier} (complete: {complete})");
                Ok(())
            }
            Err(StateError {
                reason: StateErrorReason::ConditionFailed,
                ..
            }) => Err(HandlerError::already_exists(
                &self.guard.type_name,
                &primary_identifier,
            )),
            Err(err) => Err(storage_failure(err)),
        }
    }
}

/// Session over a complete record, used by read and update.
pub struct RecordSession<M> {
    guard: RecordGuard,
    record: ResourceRecord,
    model: M,
    updated: Option<M>,
}

impl<M: ResourceModel> RecordSession<M> {
    pub fn primary_identifier(&self) -> &str {
        &self.record.primary_identifier
    }

    /// The stored model, or the pending update if one has been made.
    pub fn read_model(&self) -> M {
        self.updated.as_ref().unwrap_or(&self.model).clone()
    }

    /// Replace the stored model when the session ends.
    pub fn update_model(&mut self, model: M) {
        self.updated = Some(model);
    }
}

#[async_trait]
impl<M: ResourceModel> Commit for RecordSession<M> {
    async fn commit(self) -> Result<(), HandlerError> {
        let Some(model) = self.updated else {
            return Ok(());
        };
        let record: ResourceRecord =
            self.guard
                .record(&self.record.primary_identifier, &model, self.record.complete)?;

        match self.guard.store.update_record(record).await {
            Ok(()) => Ok(()),
            Err(StateError {
                reason: StateErrorReason::MissingEntry,
                ..
            }) => Err(HandlerError::not_found(
                &self.guard.type_name,
                &self.record.primary_identifier,
            )),
            Err(err) => Err(storage_failure(err)),
        }
    }
}

pub struct DeleteSession<M> {
    guard: RecordGuard,
    primary_identifier: String,
    model: M,
    deleted: bool,
}

impl<M: ResourceModel> DeleteSession<M> {
    pub fn primary_identifier(&self) -> &str {
        &self.primary_identifier
    }

    pub fn read_model(&self) -> M {
        self.model.clone()
    }

    /// Remove the record when the session ends.
    pub fn set_resource_deleted(&mut self) {
        self.deleted = true;
    }
}

#[async_trait]
impl<M: ResourceModel> Commit for DeleteSession<M> {
    async fn commit(self) -> Result<(), HandlerError> {
        if !self.deleted {
            return Ok(());
        }

        match self
            .guard
            .store
            .delete_record(&self.guard.type_name, &self.primary_identifier)
            .await
        {
            Ok(()) => {
                tracing::info!("Removed record {}", self.primary_identifier);
                Ok(())
            }
            Err(StateError {
                reason: StateErrorReason::MissingEntry,
                ..
            }) => Err(HandlerError::not_found(
                &self.guard.type_name,
                &self.primary_identifier,
            )),
            Err(err) => Err(storage_failure(err)),
        }
    }
}
