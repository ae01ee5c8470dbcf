//! Echo tool: repeats its input with a freshly hashed random seed.

use quill_types::{BoxFuture, Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Replies `Echo <server>: <message>, here is the seed: <sha256>`.
pub struct EchoTool {
    server_name: String,
}

#[derive(Deserialize)]
struct EchoInput {
    message: String,
}

impl EchoTool {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

fn seed_digest() -> String {
    let seed: u32 = rand::rng().random_range(0..i32::MAX as u32);
    format!("{:x}", Sha256::digest(seed.to_string().as_bytes()))
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo a message back from the server together with a hashed random seed."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "required": ["message"],
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Text to echo back"
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
            let input: EchoInput =
                serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
                    tool: "echo".into(),
                    message: e.to_string(),
                })?;

            Ok(ToolOutput::text(format!(
                "Echo {}: {}, here is the seed: {}",
                self.server_name,
                input.message,
                seed_digest()
            )))
        })
    }
}
