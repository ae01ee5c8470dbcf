//! Record tools: create, read, update, delete and list stored records.

use quill_store::{Record, RecordStore, StoreError};
use quill_types::{BoxFuture, Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// All record tools over one store, in the order they are advertised.
pub fn record_tools(store: Arc<RecordStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(CreateRecordTool::new(Arc::clone(&store))),
        Arc::new(ReadRecordTool::new(Arc::clone(&store))),
        Arc::new(UpdateRecordTool::new(Arc::clone(&store))),
        Arc::new(DeleteRecordTool::new(Arc::clone(&store))),
        Arc::new(ListRecordsTool::new(store)),
    ]
}

fn parse_input<T: DeserializeOwned>(tool: &str, input: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn store_failure(e: StoreError) -> ToolError {
    tracing::warn!("Record store operation failed: {e}");
    ToolError::ExecutionFailed(e.to_string())
}

/// A found record as JSON, or the not-found text. Absence is a normal result.
fn record_or_not_found(id: i64, record: Option<Record>) -> Result<ToolOutput, ToolError> {
    match record {
        Some(record) => ToolOutput::json(&record),
        None => Ok(ToolOutput::text(format!("Record {id} not found"))),
    }
}

fn id_schema(action: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["id"],
        "properties": {
            "id": {
                "type": "integer",
                "description": format!("ID of the record to {action}")
            }
        }
    })
}

#[derive(Deserialize)]
struct IdInput {
    id: i64,
}

#[derive(Deserialize)]
struct ContentInput {
    content: String,
}

#[derive(Deserialize)]
struct UpdateInput {
    id: i64,
    content: String,
}

/// Create a new record.
pub struct CreateRecordTool {
    store: Arc<RecordStore>,
}

impl CreateRecordTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for CreateRecordTool {
    fn name(&self) -> &str {
        "create_record"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_record".to_string(),
            description: "Create a new record. Returns the stored record with its assigned id."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Content of the new record"
                    }
                }
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let input: ContentInput = parse_input("create_record", input)?;
            let record = self.store.create(&input.content).await.map_err(store_failure)?;
            tracing::debug!("Created record {}", record.id);
            ToolOutput::json(&record)
        })
    }
}

/// Retrieve a record by id.
pub struct ReadRecordTool {
    store: Arc<RecordStore>,
}

impl ReadRecordTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for ReadRecordTool {
    fn name(&self) -> &str {
        "read_record"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_record".to_string(),
            description: "Retrieve a record by id.".to_string(),
            input_schema: id_schema("retrieve"),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let IdInput { id } = parse_input("read_record", input)?;
            let record = self.store.read(id).await.map_err(store_failure)?;
            record_or_not_found(id, record)
        })
    }
}

/// Replace the content of an existing record.
pub struct UpdateRecordTool {
    store: Arc<RecordStore>,
}

impl UpdateRecordTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for UpdateRecordTool {
    fn name(&self) -> &str {
        "update_record"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_record".to_string(),
            description: "Replace the content of an existing record.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "required": ["id", "content"],
                "properties": {
                    "id": {
                        "type": "integer",
                        "description": "ID of the record to update"
                    },
                    "content": {
                        "type": "string",
                        "description": "New content for the record"
                    }
                }
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let UpdateInput { id, content } = parse_input("update_record", input)?;
            let record = self.store.update(id, &content).await.map_err(store_failure)?;
            record_or_not_found(id, record)
        })
    }
}

/// Delete a record by id.
pub struct DeleteRecordTool {
    store: Arc<RecordStore>,
}

impl DeleteRecordTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for DeleteRecordTool {
    fn name(&self) -> &str {
        "delete_record"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_record".to_string(),
            description: "Delete a record by id. Returns the deleted record.".to_string(),
            input_schema: id_schema("delete"),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let IdInput { id } = parse_input("delete_record", input)?;
            let record = self.store.delete(id).await.map_err(store_failure)?;
            record_or_not_found(id, record)
        })
    }
}

/// List every stored record.
pub struct ListRecordsTool {
    store: Arc<RecordStore>,
}

impl ListRecordsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for ListRecordsTool {
    fn name(&self) -> &str {
        "list_records"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_records".to_string(),
            description: "List all records, ordered by id.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let records = self.store.list().await.map_err(store_failure)?;
            ToolOutput::json(&records)
        })
    }
}
