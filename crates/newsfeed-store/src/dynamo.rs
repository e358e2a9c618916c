//! DynamoDB Store Backend
//!
//! Maps the [`StoreConnection`] primitives onto `aws-sdk-dynamodb`. Error
//! classification lives here and nowhere else:
//!
//! - `ConditionalCheckFailedException` is not an error at all; it becomes
//!   the `ConditionFailed` outcome.
//! - Dispatch/timeout/response failures and the throttling family of service
//!   errors carry the retryable hint for the retry wrapper.
//! - Everything else is fatal.

use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, ReturnValue, WriteRequest};
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::conn::{Guard, Item, RangeCond, StoreConnection, UpdateOutcome, Value, WriteOutcome};
use crate::error::ConnError;
use crate::pool::ConnectionFactory;

/// One DynamoDB client, borrowed through the pool.
pub struct DynamoConnection {
    client: Client,
}

impl DynamoConnection {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_attr(value: Value) -> AttributeValue {
    match value {
        Value::S(s) => AttributeValue::S(s),
        Value::N(n) => AttributeValue::N(n.to_string()),
        Value::B(b) => AttributeValue::B(Blob::new(b)),
        Value::Null => AttributeValue::Null(true),
    }
}

fn from_attr(attr: AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::S(s),
        AttributeValue::N(n) => n.parse().map(Value::N).unwrap_or(Value::Null),
        AttributeValue::B(b) => Value::B(b.into_inner()),
        _ => Value::Null,
    }
}

fn from_item(item: HashMap<String, AttributeValue>) -> Item {
    item.into_iter()
        .map(|(attr, value)| (attr, from_attr(value)))
        .collect()
}

fn is_condition_failed<E>(err: &SdkError<E>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(service_err) => {
            service_err.err().code() == Some("ConditionalCheckFailedException")
        }
        _ => false,
    }
}

fn classify<E>(err: SdkError<E>) -> ConnError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let retryable = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service_err) => matches!(
            service_err.err().code(),
            Some(
                "ProvisionedThroughputExceededException"
                    | "ThrottlingException"
                    | "RequestLimitExceeded"
                    | "InternalServerError"
                    | "ServiceUnavailable"
            )
        ),
        _ => false,
    };

    ConnError {
        message: format!("{}", DisplayErrorContext(&err)),
        retryable,
    }
}

#[async_trait]
impl StoreConnection for DynamoConnection {
    async fn get_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        attrs: &[&'static str],
    ) -> Result<Option<Item>, ConnError> {
        let mut request = self
            .client
            .get_item()
            .table_name(table)
            .key(key.0, to_attr(key.1));

        if !attrs.is_empty() {
            let projection = attrs
                .iter()
                .enumerate()
                .map(|(idx, _)| format!("#p{idx}"))
                .collect::<Vec<_>>()
                .join(", ");
            request = request.projection_expression(projection);
            for (idx, attr) in attrs.iter().enumerate() {
                request = request.expression_attribute_names(format!("#p{idx}"), *attr);
            }
        }

        let output = request.send().await.map_err(classify)?;
        Ok(output.item.map(from_item))
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        guard: Option<Guard>,
    ) -> Result<WriteOutcome, ConnError> {
        let mut request = self.client.put_item().table_name(table);
        for (attr, value) in item {
            request = request.item(attr, to_attr(value));
        }

        if let Some(guard) = guard {
            request = match guard {
                Guard::AttributeNotExists(attr) => request
                    .condition_expression("attribute_not_exists(#c)")
                    .expression_attribute_names("#c", attr),
                Guard::AttributeEquals(attr, value) => request
                    .condition_expression("#c = :c")
                    .expression_attribute_names("#c", attr)
                    .expression_attribute_values(":c", to_attr(value)),
            };
        }

        match request.send().await {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(err) if is_condition_failed(&err) => Ok(WriteOutcome::ConditionFailed),
            Err(err) => Err(classify(err)),
        }
    }

    async fn update_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        assignments: Item,
        guard: Option<Guard>,
    ) -> Result<UpdateOutcome, ConnError> {
        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .key(key.0, to_attr(key.1))
            .return_values(ReturnValue::UpdatedOld);

        let mut clauses = Vec::with_capacity(assignments.len());
        for (idx, (attr, value)) in assignments.into_iter().enumerate() {
            clauses.push(format!("#u{idx} = :u{idx}"));
            request = request
                .expression_attribute_names(format!("#u{idx}"), attr)
                .expression_attribute_values(format!(":u{idx}"), to_attr(value));
        }
        request = request.update_expression(format!("SET {}", clauses.join(", ")));

        if let Some(guard) = guard {
            request = match guard {
                Guard::AttributeNotExists(attr) => request
                    .condition_expression("attribute_not_exists(#c)")
                    .expression_attribute_names("#c", attr),
                Guard::AttributeEquals(attr, value) => request
                    .condition_expression("#c = :c")
                    .expression_attribute_names("#c", attr)
                    .expression_attribute_values(":c", to_attr(value)),
            };
        }

        match request.send().await {
            Ok(output) => Ok(UpdateOutcome::Applied {
                old: output.attributes.map(from_item).unwrap_or_default(),
            }),
            Err(err) if is_condition_failed(&err) => Ok(UpdateOutcome::ConditionFailed),
            Err(err) => Err(classify(err)),
        }
    }

    async fn query(
        &self,
        table: &str,
        partition: (&'static str, Value),
        range: (&'static str, RangeCond),
    ) -> Result<Vec<Item>, ConnError> {
        let (comparison, bound) = match range.1 {
            RangeCond::Below(bound) => ("<", bound),
            RangeCond::AtLeast(bound) => (">=", bound),
        };

        let output = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression(format!("#pk = :pk AND #sk {comparison} :sk"))
            .expression_attribute_names("#pk", partition.0)
            .expression_attribute_names("#sk", range.0)
            .expression_attribute_values(":pk", to_attr(partition.1))
            .expression_attribute_values(":sk", AttributeValue::B(Blob::new(bound)))
            .send()
            .await
            .map_err(classify)?;

        Ok(output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_item)
            .collect())
    }

    async fn batch_delete(&self, table: &str, keys: Vec<Item>) -> Result<usize, ConnError> {
        let mut writes = Vec::with_capacity(keys.len());
        for key in keys {
            let mut delete = DeleteRequest::builder();
            for (attr, value) in key {
                delete = delete.key(attr, to_attr(value));
            }
            let delete = delete
                .build()
                .map_err(|err| ConnError::fatal(format!("invalid delete request: {err}")))?;
            writes.push(WriteRequest::builder().delete_request(delete).build());
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(table, writes)
            .send()
            .await
            .map_err(classify)?;

        let unprocessed = output
            .unprocessed_items
            .map(|tables| tables.values().map(Vec::len).sum())
            .unwrap_or(0);

        Ok(unprocessed)
    }
}

/// Builds [`DynamoConnection`] handles from one shared SDK configuration.
pub struct DynamoFactory {
    config: aws_sdk_dynamodb::Config,
}

impl DynamoFactory {
    pub fn new(region: &str, access_key_id: &str, secret_key: &str) -> Self {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::from_keys(access_key_id, secret_key, None))
            .build();

        Self { config }
    }
}

impl ConnectionFactory for DynamoFactory {
    fn connect(&self) -> Box<dyn StoreConnection> {
        Box::new(DynamoConnection::new(Client::from_conf(self.config.clone())))
    }
}
