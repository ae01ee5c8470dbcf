//! Quill CLI: chat with a model that can use the tools of an MCP server.

mod prompt;

use anyhow::{Context, Result};
use clap::Parser;
use prompt::{Input, LineReader, summarize_input, summarize_output};
use quill_api::{AnthropicProvider, ApiClient};
use quill_config::{CliOverrides, QuillConfig};
use quill_core::{ChatEvent, Orchestrator, ProviderSampler};
use quill_mcp::{ClientOptions, McpClient, McpTool};
use quill_tools::ToolRegistry;
use quill_types::{Conversation, Usage, provider::Provider};
use std::io::{self, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "quill", version, about = "Chat with a model that uses MCP server tools")]
struct Cli {
    /// Send a single prompt and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Maximum tokens in the response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// API key (overrides ANTHROPIC_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Tool server command (default: quill-server next to this binary)
    #[arg(long)]
    server: Option<String>,

    /// Do not offer sampling to the server
    #[arg(long)]
    no_sampling: bool,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    /// Arguments passed to the tool server (after `--`)
    #[arg(last = true)]
    server_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = QuillConfig::load(CliOverrides {
        api_key: cli.api_key,
        model: cli.model,
        max_tokens: cli.max_tokens,
        server_command: cli.server,
        server_args: cli.server_args,
        no_sampling: cli.no_sampling,
    })?;

    let client = ApiClient::new(&config.api_key, &config.api_base_url)
        .context("Failed to create API client")?;
    let provider: Arc<dyn Provider> = Arc::new(AnthropicProvider::from_client(client));

    let options = if config.sampling {
        ClientOptions::with_sampler(Arc::new(ProviderSampler::new(
            Arc::clone(&provider),
            config.sampling_model.clone(),
        )))
    } else {
        ClientOptions::default()
    };
    let mcp = McpClient::connect(&config.server_name, &config.server, options)
        .await
        .with_context(|| format!("Failed to start tool server `{}`", config.server.command))?;
    let mcp = Arc::new(mcp);

    let mut registry = ToolRegistry::new();
    for tool in McpTool::all(&mcp) {
        registry.register(Arc::new(tool))?;
    }
    let mut orchestrator = Orchestrator::new(
        provider,
        Arc::new(registry),
        config.model.clone(),
        config.max_tokens,
    );
    orchestrator.set_system_prompt(system_prompt(&mcp));

    let result = match cli.print {
        Some(prompt) => {
            let mut conversation = Conversation::new();
            run_turn(&orchestrator, &mut conversation, &prompt)
                .await
                .map(|usage| print_usage(&usage))
        }
        None => {
            print_banner(&config, &mcp);
            repl(&orchestrator, &mcp).await
        }
    };

    // Tools hold the other references to the client.
    drop(orchestrator);
    match Arc::try_unwrap(mcp) {
        Ok(mcp) => mcp.shutdown().await,
        Err(_) => tracing::warn!("Tool server still in use at exit"),
    }
    result
}

async fn repl(orchestrator: &Orchestrator, mcp: &McpClient) -> Result<()> {
    let mut reader = LineReader::new();
    let mut conversation = Conversation::new();
    let mut total_usage = Usage::default();

    loop {
        let input = match reader.read("Q: ").await? {
            Input::Line(line) => line,
            Input::Interrupted => {
                eprintln!("(Type /quit or press Ctrl+D to exit)");
                continue;
            }
            Input::Eof => {
                eprintln!();
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = handle_slash_command(input, &mut conversation, mcp) {
            match result {
                SlashResult::Continue => continue,
                SlashResult::Break => break,
                SlashResult::Unknown => {
                    eprintln!("Unknown command: {input}. Type /help for available commands.");
                    continue;
                }
            }
        }

        match run_turn(orchestrator, &mut conversation, input).await {
            Ok(usage) => total_usage.add(&usage),
            Err(e) => eprintln!("\nError: {e}"),
        }
        println!();
    }

    print_usage(&total_usage);
    Ok(())
}

enum SlashResult {
    Continue,
    Break,
    Unknown,
}

fn handle_slash_command(
    input: &str,
    conversation: &mut Conversation,
    mcp: &McpClient,
) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let cmd = input.split_whitespace().next().unwrap_or(input);
    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/clear" => {
            *conversation = Conversation::new();
            eprintln!("Conversation cleared.");
            Some(SlashResult::Continue)
        }
        "/tools" => {
            print_tools(mcp);
            Some(SlashResult::Continue)
        }
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

/// Run one turn, streaming text to stdout. Ctrl+C cancels the turn.
async fn run_turn(
    orchestrator: &Orchestrator,
    conversation: &mut Conversation,
    input: &str,
) -> Result<Usage> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let stdout = io::stdout();
    let result = orchestrator
        .run_turn(conversation, input, cancel, |event| {
            let mut out = stdout.lock();
            match event {
                ChatEvent::TextDelta(text) => {
                    let _ = write!(out, "{text}");
                    let _ = out.flush();
                }
                ChatEvent::ToolStart { name, input, .. } => {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "  [tool: {name}({})]", summarize_input(&input));
                }
                ChatEvent::ToolEnd {
                    name,
                    output,
                    is_error,
                    ..
                } => {
                    let status = if is_error { "error" } else { "done" };
                    let _ = writeln!(out, "  [tool {name} {status}: {}]", summarize_output(&output));
                }
                ChatEvent::Done => {
                    let _ = writeln!(out);
                }
                ChatEvent::Cancelled => {
                    let _ = writeln!(io::stderr(), "\n[cancelled]");
                }
                ChatEvent::Usage(_) | ChatEvent::Error(_) => {}
            }
        })
        .await;
    interrupt.abort();

    Ok(result?)
}

fn system_prompt(mcp: &McpClient) -> String {
    let mut prompt = format!(
        "You are Quill, an assistant running in a terminal. You are connected to the \
         tool server \"{}\" and can use its tools to read and change the user's records. \
         Use the tools when they help. Be concise.",
        mcp.server_info().name
    );
    if let Some(instructions) = mcp.instructions() {
        prompt.push_str("\n\nServer instructions:\n");
        prompt.push_str(instructions);
    }
    prompt
}

fn print_banner(config: &QuillConfig, mcp: &McpClient) {
    eprintln!(
        "quill v{} (model: {}, server: {} {}, protocol {})",
        env!("CARGO_PKG_VERSION"),
        config.model,
        mcp.server_info().name,
        mcp.server_info().version,
        mcp.protocol_version()
    );
    print_tools(mcp);
    eprintln!("Type your message. /help for commands, Ctrl+D to exit.\n");
}

fn print_tools(mcp: &McpClient) {
    eprintln!("Tools ({}):", mcp.tools().len());
    for tool in mcp.tools() {
        eprintln!("  {:<18} {}", tool.name, tool.description);
    }
}

fn print_usage(usage: &Usage) {
    eprintln!(
        "Tokens: input {}, output {}",
        usage.input_tokens, usage.output_tokens
    );
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /tools  List the server's tools");
    eprintln!("  /clear  Start a new conversation");
    eprintln!("  /help   Show this help");
    eprintln!("  /quit   Exit");
    eprintln!();
    eprintln!("Ctrl+C cancels a running reply. Ctrl+D exits.");
}
