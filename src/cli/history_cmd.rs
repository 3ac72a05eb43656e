use anyhow::Result;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::history::HistoryStore;

pub fn run(config: &AppConfig, days: u32, opts: &OutputOptions) -> Result<()> {
    let store = HistoryStore::load(config.history_path());
    let summary = store.summary(days);

    match opts.format {
        OutputFormat::Text => println!("{}", renderer::render_history(&summary, opts.use_color)),
        OutputFormat::Json => opts.print_json(&summary)?,
    }
    Ok(())
}
