use async_trait::async_trait;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::get_item::GetItemOutput;
use aws_sdk_dynamodb::operation::put_item::{PutItemError, PutItemOutput};
use aws_sdk_dynamodb::operation::query::QueryOutput;
use aws_sdk_dynamodb::types::AttributeValue;
use lambda_runtime::tracing;
use state::StateErrorReason::{BackendFailure, BadState, ConditionFailed, MissingEntry};
use state::StateOperation::{CreateRecord, DeleteRecord, GetRecord, ListRecords, UpdateRecord};
use state::{RecordStore, ResourceRecord, StateError, StateOperation, state_key};
use std::collections::HashMap;

pub mod table;

pub use table::DynamoDbTableCreator;

pub(crate) const TYPE_NAME: &str = "type_name";
pub(crate) const PRIMARY_IDENTIFIER: &str = "primary_identifier";
pub(crate) const COMPLETE: &str = "complete";

/// Overwrite only when there is no record yet or the existing one is pending.
const ABSENT_OR_PENDING: &str = "attribute_not_exists(#id) OR #complete = :pending";
const EXISTS: &str = "attribute_exists(#id)";

type Item = HashMap<String, AttributeValue>;

/// Resource records stored in a DynamoDB table,
/// keyed by `type_name` (hash) and `primary_identifier` (range).
pub struct DynamoDbRecordStore {
    table_name: String,
    dynamodb_client: aws_sdk_dynamodb::Client,
    consistent_read: bool,
}

impl DynamoDbRecordStore {
    pub fn new(dynamodb_client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        DynamoDbRecordStore {
            table_name: table_name.into(),
            dynamodb_client,
            consistent_read: true,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key(type_name: &str, primary_identifier: &str) -> Item {
        HashMap::from([
            (TYPE_NAME.to_string(), AttributeValue::S(type_name.to_string())),
            (
                PRIMARY_IDENTIFIER.to_string(),
                AttributeValue::S(primary_identifier.to_string()),
            ),
        ])
    }

    fn to_item(record: &ResourceRecord, operation: StateOperation) -> Result<Item, StateError> {
        serde_dynamo::to_item(record).map_err(|err| {
            StateError::new(record.state_key(), operation, BadState(err.to_string()))
        })
    }

    fn from_item(
        item: Item,
        key: &str,
        operation: StateOperation,
    ) -> Result<ResourceRecord, StateError> {
        serde_dynamo::from_item(item)
            .map_err(|err| StateError::new(key.to_string(), operation, BadState(err.to_string())))
    }

    async fn put_item(
        &self,
        item: Item,
        condition: &str,
        values: Option<Item>,
    ) -> Result<PutItemOutput, SdkError<PutItemError, HttpResponse>> {
        let mut request = self
            .dynamodb_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression(condition)
            .expression_attribute_names("#id", PRIMARY_IDENTIFIER);

        if values.is_some() {
            request = request
                .expression_attribute_names("#complete", COMPLETE)
                .set_expression_attribute_values(values);
        }

        request.send().await
    }
}

fn is_conditional_check_failed(err: &SdkError<PutItemError, HttpResponse>) -> bool {
    err.as_service_error()
        .is_some_and(|err| err.is_conditional_check_failed_exception())
}

#[async_trait]
impl RecordStore for DynamoDbRecordStore {
    async fn create_record(&self, record: ResourceRecord) -> Result<(), StateError> {
        let item: Item = Self::to_item(&record, CreateRecord)?;
        let values: Item = HashMap::from([(":pending".to_string(), AttributeValue::Bool(false))]);

        self.put_item(item, ABSENT_OR_PENDING, Some(values))
            .await
            .map_err(|err| {
                let reason = if is_conditional_check_failed(&err) {
                    ConditionFailed
                } else {
                    BackendFailure(err.into())
                };

                StateError::new(record.state_key(), CreateRecord, reason)
            })?;

        tracing::debug!(
            "Created record {} (complete: {})",
            record.state_key(),
            record.complete
        );

        Ok(())
    }

    async fn get_record(
        &self,
        type_name: &str,
        primary_identifier: &str,
    ) -> Result<Option<ResourceRecord>, StateError> {
        let key: String = state_key(type_name, primary_identifier);

        let output: GetItemOutput = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .consistent_read(self.consistent_read)
            .set_key(Some(Self::key(type_name, primary_identifier)))
            .send()
            .await
            .map_err(|err| StateError::new(key.clone(), GetRecord, BackendFailure(err.into())))?;

        output
            .item
            .map(|item| Self::from_item(item, &key, GetRecord))
            .transpose()
    }

    async fn update_record(&self, record: ResourceRecord) -> Result<(), StateError> {
        let item: Item = Self::to_item(&record, UpdateRecord)?;

        self.put_item(item, EXISTS, None).await.map_err(|err| {
            let reason = if is_conditional_check_failed(&err) {
                MissingEntry
            } else {
                BackendFailure(err.into())
            };

            StateError::new(record.state_key(), UpdateRecord, reason)
        })?;

        Ok(())
    }

    async fn delete_record(
        &self,
        type_name: &str,
        primary_identifier: &str,
    ) -> Result<(), StateError> {
        let key: String = state_key(type_name, primary_identifier);

        self.dynamodb_client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(type_name, primary_identifier)))
            .condition_expression(EXISTS)
            .expression_attribute_names("#id", PRIMARY_IDENTIFIER)
            .send()
            .await
            .map_err(|err| {
                let missing: bool = err
                    .as_service_error()
                    .is_some_and(|err| err.is_conditional_check_failed_exception());
                let reason = if missing {
                    MissingEntry
                } else {
                    BackendFailure(err.into())
                };

                StateError::new(key.clone(), DeleteRecord, reason)
            })?;

        tracing::debug!("Deleted record {key}");

        Ok(())
    }

    async fn list_records(&self, type_name: &str) -> Result<Vec<ResourceRecord>, StateError> {
        let mut records: Vec<ResourceRecord> = Vec::new();
        let mut exclusive_start_key: Option<Item> = None;

        loop {
            let output: QueryOutput = self
                .dynamodb_client
                .query()
                .table_name(&self.table_name)
                .consistent_read(self.consistent_read)
                .key_condition_expression("#type = :type")
                .filter_expression("#complete = :complete")
                .expression_attribute_names("#type", TYPE_NAME)
                .expression_attribute_names("#complete", COMPLETE)
                .expression_attribute_values(":type", AttributeValue::S(type_name.to_string()))
                .expression_attribute_values(":complete", AttributeValue::Bool(true))
                .set_exclusive_start_key(exclusive_start_key.take())
                .send()
                .await
                .map_err(|err| {
                    StateError::new(type_name.to_string(), ListRecords, BackendFailure(err.into()))
                })?;

            for item in output.items.unwrap_or_default() {
                records.push(Self::from_item(item, type_name, ListRecords)?);
            }

            match output.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => exclusive_start_key = Some(last_key),
                _ => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::Client;
    use aws_sdk_dynamodb::operation::delete_item::{DeleteItemError, DeleteItemOutput};
    use aws_sdk_dynamodb::types::error::ConditionalCheckFailedException;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use serde_json::json;

    const TABLE: &str = "extension-records";
    const TYPE: &str = "Test::Resource::Thing";

    fn record(identifier: &str, complete: bool) -> ResourceRecord {
        ResourceRecord {
            type_name: TYPE.to_string(),
            primary_identifier: identifier.to_string(),
            complete,
            model: json!({"Name": "thing"}),
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn item(identifier: &str, complete: bool) -> Item {
        serde_dynamo::to_item(record(identifier, complete)).expect("Record should convert")
    }

    #[tokio::test]
    async fn create_writes_conditionally() {
        let put_rule = mock!(Client::put_item)
            .match_requests(|req| {
                req.table_name() == Some(TABLE)
                    && req.condition_expression() == Some(ABSENT_OR_PENDING)
                    && req
                        .item()
                        .and_then(|item| item.get(PRIMARY_IDENTIFIER))
                        .is_some_and(|id| id == &AttributeValue::S("a|b|c".to_string()))
            })
            .then_output(|| PutItemOutput::builder().build());
        let store = DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&put_rule]), TABLE);

        store
            .create_record(record("a|b|c", true))
            .await
            .expect("Create should succeed");

        assert_eq!(1, put_rule.num_calls());
    }

    #[tokio::test]
    async fn rejected_create_is_a_failed_condition() {
        let put_rule = mock!(Client::put_item).then_error(|| {
            PutItemError::ConditionalCheckFailedException(
                ConditionalCheckFailedException::builder().build(),
            )
        });
        let store = DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&put_rule]), TABLE);

        let err: StateError = store
            .create_record(record("a|b|c", true))
            .await
            .expect_err("Create should be rejected");

        assert_eq!(CreateRecord, err.operation);
        assert!(matches!(err.reason, ConditionFailed));
    }

    #[tokio::test]
    async fn get_returns_stored_record() {
        let get_rule = mock!(Client::get_item)
            .match_requests(|req| {
                req.key()
                    .and_then(|key| key.get(TYPE_NAME))
                    .is_some_and(|type_name| type_name == &AttributeValue::S(TYPE.to_string()))
            })
            .then_output(|| {
                GetItemOutput::builder()
                    .set_item(Some(item("a|b|c", false)))
                    .build()
            });
        let store = DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&get_rule]), TABLE);

        let found: Option<ResourceRecord> = store
            .get_record(TYPE, "a|b|c")
            .await
            .expect("Get should succeed");

        assert_eq!(Some(record("a|b|c", false)), found);
    }

    #[tokio::test]
    async fn get_of_missing_item_is_none() {
        let get_rule =
            mock!(Client::get_item).then_output(|| GetItemOutput::builder().build());
        let store = DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&get_rule]), TABLE);

        let found: Option<ResourceRecord> = store
            .get_record(TYPE, "a|b|c")
            .await
            .expect("Get should succeed");

        assert_eq!(None, found);
    }

    #[tokio::test]
    async fn delete_of_missing_item_is_missing_entry() {
        let delete_rule = mock!(Client::delete_item).then_error(|| {
            DeleteItemError::ConditionalCheckFailedException(
                ConditionalCheckFailedException::builder().build(),
            )
        });
        let store =
            DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&delete_rule]), TABLE);

        let err: StateError = store
            .delete_record(TYPE, "a|b|c")
            .await
            .expect_err("Delete should fail");

        assert!(matches!(err.reason, MissingEntry));
    }

    #[tokio::test]
    async fn delete_of_existing_item_succeeds() {
        let delete_rule =
            mock!(Client::delete_item).then_output(|| DeleteItemOutput::builder().build());
        let store =
            DynamoDbRecordStore::new(mock_client!(aws_sdk_dynamodb, [&delete_rule]), TABLE);

        store
            .delete_record(TYPE, "a|b|c")
            .await
            .expect("Delete should succeed");
    }

    #[tokio::test]
    async fn list_follows_pagination() {
        let first_page = mock!(Client::query)
            .match_requests(|req| req.exclusive_start_key().is_none())
            .then_output(|| {
                QueryOutput::builder()
                    .items(item("a", true))
                    .set_last_evaluated_key(Some(DynamoDbRecordStore::key(TYPE, "a")))
                    .build()
            });
        let second_page = mock!(Client::query)
            .match_requests(|req| req.exclusive_start_key().is_some())
            .then_output(|| QueryOutput::builder().items(item("b", true)).build());
        let store = DynamoDbRecordStore::new(
            mock_client!(aws_sdk_dynamodb, RuleMode::Sequential, [&first_page, &second_page]),
            TABLE,
        );

        let listed: Vec<ResourceRecord> =
            store.list_records(TYPE).await.expect("List should succeed");

        assert_eq!(vec![record("a", true), record("b", true)], listed);
    }
}
