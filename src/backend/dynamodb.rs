use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeValue, ConditionCheck, Delete, DeleteRequest, Get, KeysAndAttributes, Put, PutRequest, ReturnValue,
    Select as SdkSelect, TransactGetItem, TransactWriteItem, Update as SdkUpdate, WriteRequest,
};

use crate::backend::expression::ExpressionBuilder;
use crate::backend::{
    Backend, BackendResult, BatchGetRequest, BatchGetResponse, BatchWrite, BatchWriteRequest,
    BatchWriteResponse, DeleteItemRequest, GetItemRequest, Operation, Page, PutItemRequest,
    QueryRequest, ScanRequest, Select, TransactGet, TransactWriteOp, UpdateItemRequest,
};
use crate::config::TableConfig;
use crate::error::{BackendError, Error, FailureKind};
use crate::table::conditions::{Precondition, RangeFilter, Update};
use crate::table::{Item, ReturnValues};
use std::collections::HashMap;

/// Direct store backend over `aws-sdk-dynamodb`
///
/// Every instance owns its client; clones share the underlying connection
/// pool.
#[derive(Debug, Clone)]
pub struct DynamoDbBackend {
    client: Client,
}

impl DynamoDbBackend {
    /// Backend over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Backend with a client built from the table configuration
    pub async fn from_config(config: &TableConfig) -> Self {
        let sdk_config = config.load_sdk_config().await;
        Self::new(Client::new(&sdk_config))
    }

    /// Underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Machine-readable service error code to failure kind
fn kind_for_code(code: Option<&str>) -> FailureKind {
    match code {
        Some("ConditionalCheckFailedException") => FailureKind::PreconditionFailed,
        Some(
            "ProvisionedThroughputExceededException"
            | "RequestLimitExceeded"
            | "ThrottlingException"
            | "LimitExceededException",
        ) => FailureKind::Throttled,
        Some("TransactionConflictException" | "TransactionInProgressException") => {
            FailureKind::Conflict
        }
        Some("ResourceNotFoundException") => FailureKind::TableNotFound,
        Some("ValidationException" | "ItemCollectionSizeLimitExceededException") => {
            FailureKind::Validation
        }
        Some("InternalServerError" | "ServiceUnavailable") => FailureKind::Transport,
        _ => FailureKind::Unknown,
    }
}

/// Turn an SDK failure into a classified backend error
fn classify<E>(operation: Operation, table: &str, err: SdkError<E>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::ConstructionFailure(_) => FailureKind::Validation,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            FailureKind::Transport
        }
        SdkError::ServiceError(context) => kind_for_code(context.err().code()),
        _ => FailureKind::Unknown,
    };
    let message = DisplayErrorContext(&err).to_string();

    tracing::debug!(
        table,
        operation = operation.as_str(),
        kind = kind.as_str(),
        "backend call failed"
    );

    BackendError::new(kind, operation.as_str(), table, message).with_source(err)
}

/// Classify a cancelled transaction from its per-item reasons
fn classify_transaction(table: &str, err: SdkError<TransactWriteItemsError>) -> BackendError {
    let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
        err.as_service_error()
    else {
        return classify(Operation::TransactWriteItems, table, err);
    };

    let codes: Vec<Option<&str>> = cancelled
        .cancellation_reasons()
        .iter()
        .map(|reason| reason.code())
        .collect();
    let failed_items: Vec<usize> = codes
        .iter()
        .enumerate()
        .filter(|(_, code)| **code == Some("ConditionalCheckFailed"))
        .map(|(index, _)| index)
        .collect();

    let kind = if !failed_items.is_empty() {
        FailureKind::PreconditionFailed
    } else if codes.contains(&Some("TransactionConflict")) {
        FailureKind::Conflict
    } else if codes
        .iter()
        .any(|code| matches!(code, Some("ThrottlingError" | "ProvisionedThroughputExceeded")))
    {
        FailureKind::Throttled
    } else if codes.contains(&Some("ValidationError")) {
        FailureKind::Validation
    } else {
        FailureKind::Unknown
    };
    let message = format!("transaction cancelled, reasons: {codes:?}");

    tracing::debug!(
        table,
        kind = kind.as_str(),
        failed = failed_items.len(),
        "transaction cancelled"
    );

    BackendError::new(kind, Operation::TransactWriteItems.as_str(), table, message)
        .with_failed_items(failed_items)
        .with_source(err)
}

fn invalid_request(operation: Operation, table: &str, err: Error) -> BackendError {
    BackendError::new(
        FailureKind::Validation,
        operation.as_str(),
        table,
        err.to_string(),
    )
}

fn invalid_build(operation: Operation, table: &str, err: BuildError) -> BackendError {
    BackendError::new(
        FailureKind::Validation,
        operation.as_str(),
        table,
        err.to_string(),
    )
    .with_source(err)
}

fn return_value(values: ReturnValues) -> ReturnValue {
    match values {
        ReturnValues::None => ReturnValue::None,
        ReturnValues::AllOld => ReturnValue::AllOld,
        ReturnValues::UpdatedOld => ReturnValue::UpdatedOld,
        ReturnValues::AllNew => ReturnValue::AllNew,
        ReturnValues::UpdatedNew => ReturnValue::UpdatedNew,
    }
}

/// Page limit as the SDK takes it, saturating at `i32::MAX`
fn page_limit(limit: Option<u32>) -> Option<i32> {
    limit.map(|limit| i32::try_from(limit).unwrap_or(i32::MAX))
}

fn old_values(return_old: bool) -> ReturnValue {
    if return_old {
        ReturnValue::AllOld
    } else {
        ReturnValue::None
    }
}

/// Expressions rendered for one request
#[derive(Debug, Default)]
struct Rendered {
    condition: Option<String>,
    update: Option<String>,
    filter: Option<String>,
    projection: Option<String>,
    key_condition: Option<String>,
    names: Option<HashMap<String, String>>,
    values: Option<Item>,
}

impl Rendered {
    fn render(
        precondition: Option<&Precondition>,
        update: Option<&Update>,
        filter: Option<&RangeFilter>,
        projection: Option<&[String]>,
        partition_key: Option<&(String, AttributeValue)>,
    ) -> Result<Self, Error> {
        let mut builder = ExpressionBuilder::new();
        let mut rendered = Rendered {
            key_condition: partition_key
                .map(|(name, value)| builder.key_condition(name, value.clone())),
            ..Default::default()
        };
        rendered.condition = precondition.map(|p| builder.condition(p)).transpose()?;
        rendered.update = update.map(|u| builder.update(u)).transpose()?;
        rendered.filter = filter.map(|f| builder.filter(f)).transpose()?;
        rendered.projection = projection.map(|p| builder.projection(p)).transpose()?;

        let (names, values) = builder.build();
        rendered.names = names;
        rendered.values = values;
        Ok(rendered)
    }

    fn condition(precondition: Option<&Precondition>) -> Result<Self, Error> {
        Self::render(precondition, None, None, None, None)
    }
}

#[async_trait]
impl Backend for DynamoDbBackend {
    async fn get_item(&self, request: GetItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::GetItem;
        let rendered = Rendered::render(None, None, None, request.projection.as_deref(), None)
            .map_err(|e| invalid_request(op, &request.table, e))?;

        let output = self
            .client
            .get_item()
            .table_name(&request.table)
            .set_key(Some(request.key))
            .consistent_read(request.consistent_read)
            .set_projection_expression(rendered.projection)
            .set_expression_attribute_names(rendered.names)
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(output.item)
    }

    async fn put_item(&self, request: PutItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::PutItem;
        let rendered = Rendered::condition(request.precondition.as_ref())
            .map_err(|e| invalid_request(op, &request.table, e))?;

        let output = self
            .client
            .put_item()
            .table_name(&request.table)
            .set_item(Some(request.item))
            .set_condition_expression(rendered.condition)
            .set_expression_attribute_names(rendered.names)
            .set_expression_attribute_values(rendered.values)
            .return_values(old_values(request.return_old))
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(output.attributes)
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::DeleteItem;
        let rendered = Rendered::condition(request.precondition.as_ref())
            .map_err(|e| invalid_request(op, &request.table, e))?;

        let output = self
            .client
            .delete_item()
            .table_name(&request.table)
            .set_key(Some(request.key))
            .set_condition_expression(rendered.condition)
            .set_expression_attribute_names(rendered.names)
            .set_expression_attribute_values(rendered.values)
            .return_values(old_values(request.return_old))
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(output.attributes)
    }

    async fn update_item(&self, request: UpdateItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::UpdateItem;
        let rendered = Rendered::render(
            request.precondition.as_ref(),
            Some(&request.update),
            None,
            None,
            None,
        )
        .map_err(|e| invalid_request(op, &request.table, e))?;

        let output = self
            .client
            .update_item()
            .table_name(&request.table)
            .set_key(Some(request.key))
            .set_update_expression(rendered.update)
            .set_condition_expression(rendered.condition)
            .set_expression_attribute_names(rendered.names)
            .set_expression_attribute_values(rendered.values)
            .return_values(return_value(request.return_values))
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(output.attributes)
    }

    async fn query(&self, request: QueryRequest) -> BackendResult<Page> {
        let op = Operation::Query;
        let rendered = Rendered::render(
            None,
            None,
            request.filter.as_ref(),
            request.projection.as_deref(),
            Some(&request.partition_key),
        )
        .map_err(|e| invalid_request(op, &request.table, e))?;

        let output = self
            .client
            .query()
            .table_name(&request.table)
            .set_key_condition_expression(rendered.key_condition)
            .set_filter_expression(rendered.filter)
            .set_projection_expression(rendered.projection)
            .set_expression_attribute_names(rendered.names)
            .set_expression_attribute_values(rendered.values)
            .consistent_read(request.consistent_read)
            .scan_index_forward(request.scan_forward)
            .set_limit(page_limit(request.limit))
            .set_exclusive_start_key(request.exclusive_start_key)
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(Page {
            items: output.items.unwrap_or_default(),
            count: output.count.max(0) as usize,
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn scan(&self, request: ScanRequest) -> BackendResult<Page> {
        let op = Operation::Scan;
        let projection = match request.select {
            Select::Items => request.projection.as_deref(),
            Select::Count => None,
        };
        let rendered = Rendered::render(None, None, request.filter.as_ref(), projection, None)
            .map_err(|e| invalid_request(op, &request.table, e))?;

        let select = match request.select {
            Select::Items if rendered.projection.is_some() => SdkSelect::SpecificAttributes,
            Select::Items => SdkSelect::AllAttributes,
            Select::Count => SdkSelect::Count,
        };

        let output = self
            .client
            .scan()
            .table_name(&request.table)
            .select(select)
            .set_filter_expression(rendered.filter)
            .set_projection_expression(rendered.projection)
            .set_expression_attribute_names(rendered.names)
            .set_expression_attribute_values(rendered.values)
            .consistent_read(request.consistent_read)
            .set_limit(page_limit(request.limit))
            .set_exclusive_start_key(request.exclusive_start_key)
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        Ok(Page {
            items: output.items.unwrap_or_default(),
            count: output.count.max(0) as usize,
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn batch_get(&self, request: BatchGetRequest) -> BackendResult<BatchGetResponse> {
        let op = Operation::BatchGetItem;
        if request.keys.is_empty() {
            return Ok(BatchGetResponse::default());
        }

        let rendered = Rendered::render(None, None, None, request.projection.as_deref(), None)
            .map_err(|e| invalid_request(op, &request.table, e))?;

        let keys_and_attributes = KeysAndAttributes::builder()
            .set_keys(Some(request.keys))
            .consistent_read(request.consistent_read)
            .set_projection_expression(rendered.projection)
            .set_expression_attribute_names(rendered.names)
            .build()
            .map_err(|e| invalid_build(op, &request.table, e))?;

        let output = self
            .client
            .batch_get_item()
            .request_items(&request.table, keys_and_attributes)
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        let mut response = BatchGetResponse::default();
        if let Some(mut responses) = output.responses {
            response.items = responses.remove(&request.table).unwrap_or_default();
        }
        if let Some(mut unprocessed) = output.unprocessed_keys {
            if let Some(keys_and_attributes) = unprocessed.remove(&request.table) {
                response.unprocessed_keys = keys_and_attributes.keys;
            }
        }

        Ok(response)
    }

    async fn batch_write(&self, request: BatchWriteRequest) -> BackendResult<BatchWriteResponse> {
        let op = Operation::BatchWriteItem;
        if request.writes.is_empty() {
            return Ok(BatchWriteResponse::default());
        }

        let mut write_ops: Vec<WriteRequest> = Vec::with_capacity(request.writes.len());
        for write in request.writes {
            let write_request = match write {
                BatchWrite::Put(item) => WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(item))
                            .build()
                            .map_err(|e| invalid_build(op, &request.table, e))?,
                    )
                    .build(),
                BatchWrite::Delete(key) => WriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(key))
                            .build()
                            .map_err(|e| invalid_build(op, &request.table, e))?,
                    )
                    .build(),
            };
            write_ops.push(write_request);
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(&request.table, write_ops)
            .send()
            .await
            .map_err(|e| classify(op, &request.table, e))?;

        let mut response = BatchWriteResponse::default();
        if let Some(mut unprocessed) = output.unprocessed_items {
            for write_request in unprocessed.remove(&request.table).unwrap_or_default() {
                if let Some(put_request) = write_request.put_request {
                    response.unprocessed.push(BatchWrite::Put(put_request.item));
                }
                if let Some(delete_request) = write_request.delete_request {
                    response
                        .unprocessed
                        .push(BatchWrite::Delete(delete_request.key));
                }
            }
        }

        Ok(response)
    }

    async fn transact_get(&self, items: Vec<TransactGet>) -> BackendResult<Vec<Option<Item>>> {
        let op = Operation::TransactGetItems;
        let Some(table) = items.first().map(|item| item.table.clone()) else {
            return Ok(Vec::new());
        };

        let mut transact_items = Vec::with_capacity(items.len());
        for item in items {
            let rendered = Rendered::render(None, None, None, item.projection.as_deref(), None)
                .map_err(|e| invalid_request(op, &item.table, e))?;
            let get = Get::builder()
                .table_name(&item.table)
                .set_key(Some(item.key))
                .set_projection_expression(rendered.projection)
                .set_expression_attribute_names(rendered.names)
                .build()
                .map_err(|e| invalid_build(op, &item.table, e))?;
            transact_items.push(TransactGetItem::builder().get(get).build());
        }

        let output = self
            .client
            .transact_get_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
            .map_err(|e| classify(op, &table, e))?;

        Ok(output
            .responses
            .unwrap_or_default()
            .into_iter()
            .map(|response| response.item)
            .collect())
    }

    async fn transact_write(&self, items: Vec<TransactWriteOp>) -> BackendResult<()> {
        let op = Operation::TransactWriteItems;
        let Some(table) = items.first().map(|item| item.table().to_string()) else {
            return Ok(());
        };

        let mut transact_items = Vec::with_capacity(items.len());
        for item in items {
            let transact_item = match item {
                TransactWriteOp::Put {
                    table,
                    item,
                    precondition,
                } => {
                    let rendered = Rendered::condition(precondition.as_ref())
                        .map_err(|e| invalid_request(op, &table, e))?;
                    let put = Put::builder()
                        .table_name(&table)
                        .set_item(Some(item))
                        .set_condition_expression(rendered.condition)
                        .set_expression_attribute_names(rendered.names)
                        .set_expression_attribute_values(rendered.values)
                        .build()
                        .map_err(|e| invalid_build(op, &table, e))?;
                    TransactWriteItem::builder().put(put).build()
                }
                TransactWriteOp::Update {
                    table,
                    key,
                    update,
                    precondition,
                } => {
                    let rendered =
                        Rendered::render(precondition.as_ref(), Some(&update), None, None, None)
                            .map_err(|e| invalid_request(op, &table, e))?;
                    let update = SdkUpdate::builder()
                        .table_name(&table)
                        .set_key(Some(key))
                        .set_update_expression(rendered.update)
                        .set_condition_expression(rendered.condition)
                        .set_expression_attribute_names(rendered.names)
                        .set_expression_attribute_values(rendered.values)
                        .build()
                        .map_err(|e| invalid_build(op, &table, e))?;
                    TransactWriteItem::builder().update(update).build()
                }
                TransactWriteOp::Delete {
                    table,
                    key,
                    precondition,
                } => {
                    let rendered = Rendered::condition(precondition.as_ref())
                        .map_err(|e| invalid_request(op, &table, e))?;
                    let delete = Delete::builder()
                        .table_name(&table)
                        .set_key(Some(key))
                        .set_condition_expression(rendered.condition)
                        .set_expression_attribute_names(rendered.names)
                        .set_expression_attribute_values(rendered.values)
                        .build()
                        .map_err(|e| invalid_build(op, &table, e))?;
                    TransactWriteItem::builder().delete(delete).build()
                }
                TransactWriteOp::ConditionCheck {
                    table,
                    key,
                    precondition,
                } => {
                    let rendered = Rendered::condition(Some(&precondition))
                        .map_err(|e| invalid_request(op, &table, e))?;
                    let check = ConditionCheck::builder()
                        .table_name(&table)
                        .set_key(Some(key))
                        .set_condition_expression(rendered.condition)
                        .set_expression_attribute_names(rendered.names)
                        .set_expression_attribute_values(rendered.values)
                        .build()
                        .map_err(|e| invalid_build(op, &table, e))?;
                    TransactWriteItem::builder().condition_check(check).build()
                }
            };
            transact_items.push(transact_item);
        }

        let _ = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
            .map_err(|e| classify_transaction(&table, e))?;

        Ok(())
    }
}
