//! robinhood-mcp - read-only Robinhood research tools for AI assistants.
//!
//! Reads one JSON request per line from stdin, `{"tool": ..., "arguments":
//! {...}}`, and writes one JSON result per line to stdout. Logs go to stderr.

use std::io;

use anyhow::{bail, Context, Result};
use robinhood_mcp_core::{build_dispatcher, Config, ErrorKind, SessionCache, ToolDispatcher, ToolId, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One line of input.
#[derive(Debug, Deserialize)]
struct ToolInvocation {
    /// Echoed back so callers can match responses to requests
    #[serde(default)]
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// One line of output.
#[derive(Debug, Serialize)]
struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(flatten)]
    result: ToolResult,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // stdout carries responses, so logs must stay on stderr.
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    if command == Some("--list-tools") {
        list_tools();
        return Ok(());
    }

    let config = Config::from_env().context("Invalid configuration")?;

    match command {
        None => {}
        Some("--logout") => return logout(&config),
        Some(other) => bail!("Unknown argument: {} (expected --list-tools or --logout)", other),
    }

    let dispatcher = build_dispatcher(&config).context("Failed to create HTTP client")?;

    info!(session_path = %config.session_path.display(), "robinhood-mcp starting");
    let result = serve(&dispatcher).await;

    let status = dispatcher.sessions().status().await;
    debug!(phase = ?status.phase, age_secs = ?status.age_secs, "Final session state");
    info!("robinhood-mcp shutting down");
    result
}

fn list_tools() {
    for tool in ToolId::ALL {
        println!("{}\t{}", tool.name(), tool.description());
    }
}

fn logout(config: &Config) -> Result<()> {
    let cache = SessionCache::new(config.session_path.clone());
    cache
        .clear()
        .with_context(|| format!("Failed to remove {}", cache.path().display()))?;
    eprintln!("Session cleared");
    Ok(())
}

/// Answer requests until stdin closes.
async fn serve(dispatcher: &ToolDispatcher) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(dispatcher, &line).await;
        let mut encoded = serde_json::to_string(&response).context("Failed to encode response")?;
        encoded.push('\n');
        stdout
            .write_all(encoded.as_bytes())
            .await
            .context("Failed to write response")?;
        stdout.flush().await.context("Failed to flush response")?;
    }

    debug!("stdin closed");
    Ok(())
}

async fn handle_line(dispatcher: &ToolDispatcher, line: &str) -> ToolResponse {
    match parse_invocation(line) {
        Ok(invocation) => ToolResponse {
            result: dispatcher.invoke(&invocation.tool, &invocation.arguments).await,
            id: invocation.id,
        },
        Err(result) => ToolResponse { id: None, result },
    }
}

fn parse_invocation(line: &str) -> Result<ToolInvocation, ToolResult> {
    serde_json::from_str(line).map_err(|e| {
        ToolResult::failure(ErrorKind::UnknownError, format!("Malformed request: {}", e))
    })
}
