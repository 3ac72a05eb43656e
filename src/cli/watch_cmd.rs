use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::cli::usage_cmd::build_engine;
use crate::core::config::AppConfig;
use crate::core::engine::PollingEngine;
use crate::core::models::state::UsageAlert;
use crate::core::notify::ALERT_THRESHOLD;

/// One NDJSON line in `--json` mode, next to the plain state lines.
#[derive(Serialize)]
struct AlertEvent<'a> {
    alert: &'a UsageAlert,
}

/// Text output target. On a terminal the block is redrawn in place so the
/// countdown can tick; otherwise each state change is appended.
struct Screen {
    in_place: bool,
    banner: String,
    /// Shown under the block until the session drops back under the threshold.
    alert: Option<UsageAlert>,
}

impl Screen {
    fn draw(&mut self, engine: &PollingEngine, opts: &OutputOptions) -> Result<()> {
        if !self.in_place {
            println!("{}\n", renderer::render_engine(engine, opts.use_color));
            return Ok(());
        }
        if engine.five_hour_utilization() < ALERT_THRESHOLD {
            self.alert = None;
        }
        execute!(std::io::stdout(), MoveTo(0, 0), Clear(ClearType::All))?;
        println!("{}", renderer::render_engine(engine, opts.use_color));
        if let Some(alert) = &self.alert {
            println!(
                "\n{}",
                renderer::render_alert(alert, |t| engine.time_remaining(t), opts.use_color)
            );
        }
        println!("\n{}", self.banner);
        Ok(())
    }

    fn show_alert(
        &mut self,
        alert: UsageAlert,
        engine: &PollingEngine,
        opts: &OutputOptions,
    ) -> Result<()> {
        if self.in_place {
            self.alert = Some(alert);
            return self.draw(engine, opts);
        }
        eprintln!(
            "{}",
            renderer::render_alert(&alert, |t| engine.time_remaining(t), opts.use_color)
        );
        Ok(())
    }
}

/// Poll until Ctrl-C, re-rendering on every state change. Enter forces a refresh.
pub async fn run(
    config: &AppConfig,
    interval: Option<u64>,
    no_notify: bool,
    opts: &OutputOptions,
) -> Result<()> {
    let engine = build_engine(config)?;
    if no_notify {
        engine.set_notifications_enabled(false);
    }

    let mut updates = engine.subscribe();
    let mut alerts = engine.subscribe_alerts();
    let mut clock = engine.subscribe_clock();
    engine.refresh_now().await;
    engine.start_polling(interval.unwrap_or(config.settings.poll_interval_secs));

    let text = matches!(opts.format, OutputFormat::Text);
    let banner = format!(
        "Refreshing every {}s. Press Enter to refresh now, Ctrl-C to quit.",
        engine.poll_interval().map_or(0, |i| i.as_secs())
    );
    let mut screen = Screen {
        in_place: text && std::io::stdout().is_terminal(),
        banner,
        alert: None,
    };
    if screen.in_place {
        engine.start_clock();
    } else if text {
        eprintln!("{}", screen.banner);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // The initial refresh already changed the state; render it first.
    let initial = updates.borrow_and_update().clone();
    if text {
        screen.draw(&engine, opts)?;
    } else {
        opts.print_json(&initial)?;
    }

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if text {
                    screen.draw(&engine, opts)?;
                } else {
                    opts.print_json(&state)?;
                }
            }
            tick = clock.changed(), if screen.in_place => {
                if tick.is_err() {
                    break;
                }
                clock.borrow_and_update();
                screen.draw(&engine, opts)?;
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => {
                    if text {
                        screen.show_alert(alert, &engine, opts)?;
                    } else {
                        opts.print_json(&AlertEvent { alert: &alert })?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("[watch] skipped {} alerts", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        engine.refresh_now().await;
                    });
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    engine.stop_polling();
    engine.flush_history().await;
    Ok(())
}
