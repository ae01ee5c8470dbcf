//! Summarize tool: asks the connected client's model to summarize the stored records.

use quill_store::RecordStore;
use quill_types::{
    BoxFuture, SamplingConstraints, SamplingMessage, SamplingRequest, Tool, ToolContext,
    ToolDefinition, ToolError, ToolOutput,
};
use serde::Deserialize;
use std::fmt::Write;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You summarize short notes. Answer with the summary only.";
const DEFAULT_INSTRUCTIONS: &str = "Summarize these notes in a few sentences.";
const SUMMARY_MAX_TOKENS: u32 = 512;

/// Reads every record and has the client generate a summary over sampling.
pub struct SummarizeRecordsTool {
    store: Arc<RecordStore>,
}

#[derive(Deserialize)]
struct SummarizeInput {
    #[serde(default)]
    instructions: Option<String>,
}

impl SummarizeRecordsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl Tool for SummarizeRecordsTool {
    fn name(&self) -> &str {
        "summarize_records"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "summarize_records".to_string(),
            description: "Summarize all stored records using the client's language model."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "instructions": {
                        "type": "string",
                        "description": "How to summarize (focus, length, format)"
                    }
                }
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let input: SummarizeInput =
                serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
                    tool: "summarize_records".into(),
                    message: e.to_string(),
                })?;

            // Fail before touching the store when the client cannot sample.
            let sampler = Arc::clone(ctx.sampler()?);

            let records = self
                .store
                .list()
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            if records.is_empty() {
                return Ok(ToolOutput::text("There are no records to summarize."));
            }

            let mut prompt = input
                .instructions
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());
            prompt.push_str("\n\n");
            for record in &records {
                let _ = writeln!(prompt, "- [{}] {}", record.id, record.content);
            }

            let request = SamplingRequest {
                messages: vec![SamplingMessage::user(prompt)],
                constraints: SamplingConstraints {
                    system_prompt: Some(SYSTEM_PROMPT.to_string()),
                    max_tokens: SUMMARY_MAX_TOKENS,
                    ..SamplingConstraints::default()
                },
            };
            tracing::debug!("Requesting summary of {} record(s)", records.len());
            let result = sampler.create_message(request).await?;
            Ok(ToolOutput::text(result.text()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::{Role, SamplingContent, SamplingError, SamplingResult, Sampler};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records the prompt it was given and answers with a canned summary.
    #[derive(Default)]
    struct Recording {
        prompts: Mutex<Vec<SamplingRequest>>,
    }

    impl Sampler for Recording {
        fn create_message(
            &self,
            request: SamplingRequest,
        ) -> BoxFuture<'_, Result<SamplingResult, SamplingError>> {
            self.prompts.lock().unwrap().push(request);
            Box::pin(async {
                Ok(SamplingResult {
                    role: Role::Assistant,
                    content: SamplingContent::Text {
                        text: "Groceries.".into(),
                    },
                    model: "mock".into(),
                    stop_reason: Some("endTurn".into()),
                })
            })
        }
    }

    async fn tool_with(contents: &[&str]) -> (TempDir, SummarizeRecordsTool) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("notes.db")).await.unwrap());
        for content in contents {
            store.create(content).await.unwrap();
        }
        (dir, SummarizeRecordsTool::new(store))
    }

    #[tokio::test]
    async fn summary_comes_from_the_sampler() {
        let (_dir, tool) = tool_with(&["buy milk", "buy eggs"]).await;
        let sampler = Arc::new(Recording::default());
        let output = tool
            .execute(
                serde_json::json!({"instructions": "One word."}),
                ToolContext::with_sampler(sampler.clone()),
            )
            .await
            .unwrap();
        assert_eq!(output.text_content(), "Groceries.");

        let prompts = sampler.prompts.lock().unwrap();
        let text = prompts[0].messages[0].content.text();
        assert!(text.starts_with("One word."));
        assert!(text.contains("buy milk"));
        assert!(text.contains("buy eggs"));
        assert_eq!(prompts[0].constraints.max_tokens, SUMMARY_MAX_TOKENS);
    }

    #[tokio::test]
    async fn without_sampler_fails_unavailable() {
        let (_dir, tool) = tool_with(&["buy milk"]).await;
        let err = tool
            .execute(serde_json::json!({}), ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sampling(SamplingError::Unavailable)));
    }

    /// A sampler whose client never agreed to sampling.
    struct Declined;

    impl Sampler for Declined {
        fn is_available(&self) -> bool {
            false
        }

        fn create_message(
            &self,
            _request: SamplingRequest,
        ) -> BoxFuture<'_, Result<SamplingResult, SamplingError>> {
            Box::pin(async { Err(SamplingError::Unavailable) })
        }
    }

    #[tokio::test]
    async fn declined_sampling_fails_even_with_an_empty_store() {
        let (_dir, tool) = tool_with(&[]).await;
        let err = tool
            .execute(serde_json::json!({}), ToolContext::with_sampler(Arc::new(Declined)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sampling(SamplingError::Unavailable)));
    }

    #[tokio::test]
    async fn empty_store_skips_sampling() {
        let (_dir, tool) = tool_with(&[]).await;
        let sampler = Arc::new(Recording::default());
        let output = tool
            .execute(serde_json::json!({}), ToolContext::with_sampler(sampler.clone()))
            .await
            .unwrap();
        assert_eq!(output.text_content(), "There are no records to summarize.");
        assert!(sampler.prompts.lock().unwrap().is_empty());
    }
}
