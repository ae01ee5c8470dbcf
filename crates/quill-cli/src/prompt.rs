//! Interactive line input and compact rendering of tool calls.

use quill_types::{truncate_str, truncate_string};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Longest tool output echoed to the terminal.
const MAX_TOOL_OUTPUT: usize = 200;

/// What the user did at the prompt.
#[derive(Debug, PartialEq)]
pub enum Input {
    Line(String),
    /// Ctrl+C at an empty prompt.
    Interrupted,
    /// Ctrl+D / closed stdin.
    Eof,
}

/// Reads prompt lines from stdin without blocking the runtime.
pub struct LineReader {
    lines: Lines<BufReader<Stdin>>,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `prompt` to stderr and wait for a line or Ctrl+C.
    pub async fn read(&mut self, prompt: &str) -> io::Result<Input> {
        eprint!("{prompt}");
        io::stderr().flush()?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                Ok(Input::Interrupted)
            }
            line = self.lines.next_line() => Ok(match line? {
                Some(line) => Input::Line(line),
                None => Input::Eof,
            }),
        }
    }
}

/// One-line summary of tool arguments, e.g. `content: buy milk, id: 3`.
pub fn summarize_input(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Object(map) => map
            .iter()
            .take(3)
            .map(|(k, v)| {
                let mut value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                truncate_string(&mut value, 60);
                format!("{k}: {value}")
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

/// First line of a tool's output, shortened for display.
pub fn summarize_output(output: &str) -> String {
    let first = output.lines().next().unwrap_or_default();
    let short = truncate_str(first, MAX_TOOL_OUTPUT);
    if short.len() < output.len() {
        format!("{short}...")
    } else {
        short.to_string()
    }
}
