use crate::{PRIMARY_IDENTIFIER, TYPE_NAME};
use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
};
use lambda_runtime::tracing;
use model::Error;
use std::time::Duration;

const TABLE_ACTIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Provisions the table backing [`crate::DynamoDbRecordStore`].
pub struct DynamoDbTableCreator {
    dynamodb_client: aws_sdk_dynamodb::Client,
}

impl DynamoDbTableCreator {
    pub fn new(dynamodb_client: aws_sdk_dynamodb::Client) -> Self {
        DynamoDbTableCreator { dynamodb_client }
    }

    /// Create an on-demand table keyed by type name and primary identifier,
    /// then wait for it to become active. An existing table is left untouched.
    pub async fn create_standard_table(&self, table_name: &str) -> Result<(), Error> {
        if self.table_exists(table_name).await? {
            tracing::info!("Table {table_name} already exists");
            return Ok(());
        }

        self.dynamodb_client
            .create_table()
            .table_name(table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(TYPE_NAME)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(PRIMARY_IDENTIFIER)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(TYPE_NAME)
                    .key_type(KeyType::Hash)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(PRIMARY_IDENTIFIER)
                    .key_type(KeyType::Range)
                    .build()?,
            )
            .send()
            .await?;

        self.dynamodb_client
            .wait_until_table_exists()
            .table_name(table_name)
            .wait(TABLE_ACTIVE_TIMEOUT)
            .await?;

        tracing::info!("Created table {table_name}");

        Ok(())
    }

    pub async fn delete_table(&self, table_name: &str) -> Result<(), Error> {
        self.dynamodb_client
            .delete_table()
            .table_name(table_name)
            .send()
            .await?;

        tracing::info!("Deleted table {table_name}");

        Ok(())
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool, Error> {
        match self
            .dynamodb_client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
