use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::engine::PollingEngine;
use crate::core::history::HistoryStore;
use crate::core::models::state::{EngineState, UsageAlert};
use crate::core::providers::claude::ClaudeApiFetcher;

#[derive(Serialize)]
struct UsagePayload {
    #[serde(flatten)]
    state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<UsageAlert>,
}

/// Wire the engine to the configured credential source, endpoint and history file.
pub fn build_engine(config: &AppConfig) -> Result<PollingEngine> {
    let fetcher = ClaudeApiFetcher::new(config.api.endpoint.clone())
        .context("Invalid API configuration")?;
    let history = HistoryStore::load(config.history_path());
    let engine = PollingEngine::new(config.credential_provider(), Arc::new(fetcher), history);
    engine.set_notifications_enabled(config.settings.notify_at_80_percent);
    Ok(engine)
}

pub async fn run(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let engine = build_engine(config)?;
    let outcome = engine.refresh_now().await;
    engine.flush_history().await;

    match opts.format {
        OutputFormat::Text => {
            println!("{}", renderer::render_engine(&engine, opts.use_color));
            if let Some(alert) = &outcome.alert {
                eprintln!(
                    "{}",
                    renderer::render_alert(alert, |t| engine.time_remaining(t), opts.use_color)
                );
            }
        }
        OutputFormat::Json => {
            opts.print_json(&UsagePayload {
                state: engine.state(),
                alert: outcome.alert.clone(),
            })?;
        }
    }

    let connection = engine.connection_state();
    if !connection.is_connected() {
        if opts.verbose {
            if let Some(reason) = connection.reason() {
                eprintln!("Refresh failed: {}", reason);
            }
        }
        std::process::exit(1);
    }
    Ok(())
}
