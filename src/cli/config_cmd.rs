use anyhow::Result;

use crate::cli::output::OutputOptions;
use crate::core::config::AppConfig;
use crate::core::history::HistoryStore;

pub fn init(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    match AppConfig::default().save() {
        Ok(path) => println!("Generated config at {}", path.display()),
        Err(e) => {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub fn check(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `cmon config init` to create one.");
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        println!("  Poll interval: {}s", config.settings.poll_interval_secs);
        println!(
            "  Notifications: {}",
            if config.settings.notify_at_80_percent { "on" } else { "off" }
        );
        let history = HistoryStore::load(config.history_path());
        if history.is_empty() {
            println!("  History file: {} (empty)", history.path().display());
        } else {
            println!(
                "  History file: {} ({} days recorded)",
                history.path().display(),
                history.len()
            );
        }
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}

pub fn interval(secs: u64, _opts: &OutputOptions) -> Result<()> {
    let mut config = AppConfig::load()?;
    config.settings.poll_interval_secs = secs;
    let issues = config.validate();
    if let Some(issue) = issues.iter().find(|i| i.contains("poll_interval_secs")) {
        eprintln!("{}", issue);
        std::process::exit(1);
    }
    let path = config.save()?;
    println!("Poll interval set to {}s in {}", secs, path.display());
    Ok(())
}

pub fn notify(setting: &str, _opts: &OutputOptions) -> Result<()> {
    let enabled = match setting {
        "on" | "true" | "yes" => true,
        "off" | "false" | "no" => false,
        other => {
            eprintln!("Unknown notify setting: '{}' (use on|off)", other);
            std::process::exit(1);
        }
    };
    let mut config = AppConfig::load()?;
    config.settings.notify_at_80_percent = enabled;
    let path = config.save()?;
    println!(
        "Notifications {} in {}",
        if enabled { "enabled" } else { "disabled" },
        path.display()
    );
    Ok(())
}
