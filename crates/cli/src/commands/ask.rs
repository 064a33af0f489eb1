//! `flowpilot ask`: run one request, one JSON line per event.

use flowpilot_agent::{Engine, Request, signal_cancel};
use flowpilot_config::AppConfig;
use flowpilot_core::cancel::CancellationToken;
use flowpilot_core::event::{Event, EventKind};
use flowpilot_core::tool::ToolRegistry;
use flowpilot_providers::OpenAiCompatProvider;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn run(
    query: String,
    flow: bool,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set FLOWPILOT_API_KEY or OPENAI_API_KEY, or add api_key to");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let engine = Engine::new(provider, ToolRegistry::new(), &config);
    let request = if flow {
        Request::flow(query)
    } else {
        Request::agent(query)
    };

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && signal_cancel(&interrupt) {
            warn!("Interrupt received, cancelling at the next checkpoint");
        }
    });

    let mut stream = engine.start_request(request, token.clone());
    let mut failed = false;
    while let Some(event) = stream.next_event().await {
        let written = write_event(&mut io::stdout().lock(), &event);
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("stdout closed, cancelling the request");
                signal_cancel(&token);
                return Ok(());
            }
            Err(e) => {
                signal_cancel(&token);
                return Err(e.into());
            }
        }
        failed |= event.kind() == EventKind::Error;
    }

    if failed {
        return Err("request failed".into());
    }
    Ok(())
}

/// Write one event as a JSON line and flush it.
fn write_event(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let line = serde_json::to_string(event)?;
    writeln!(out, "{line}")?;
    out.flush()
}
