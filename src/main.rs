mod cli;
mod core;

use clap::{Parser, Subcommand};

use crate::core::config::AppConfig;

#[derive(Parser)]
#[command(name = "cmon", about = "Claude rate-limit usage monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format (text|json)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch current usage once and display it
    Usage,
    /// Keep polling and re-render on every change
    Watch {
        /// Poll interval in seconds (default: from config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Suppress the 80% session alert
        #[arg(long)]
        no_notify: bool,
    },
    /// Show recorded daily peaks and averages
    History {
        /// Number of trailing days to include
        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Validate config file
    Check,
    /// Set the default poll interval
    Interval {
        /// Seconds between polls
        secs: u64,
    },
    /// Turn the 80% session alert on or off
    Notify {
        /// on|off
        state: String,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("[config] {}; using defaults", e);
        AppConfig::default()
    });

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            cli::output::OutputFormat::from_name(
                cli.format
                    .as_deref()
                    .unwrap_or(&config.settings.default_format),
            )
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color, &config.settings.color),
        verbose: cli.verbose,
    };

    match cli.command {
        None | Some(Commands::Usage) => cli::usage_cmd::run(&config, &output_opts).await?,
        Some(Commands::Watch {
            interval,
            no_notify,
        }) => cli::watch_cmd::run(&config, interval, no_notify, &output_opts).await?,
        Some(Commands::History { days }) => cli::history_cmd::run(&config, days, &output_opts)?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
            ConfigAction::Interval { secs } => cli::config_cmd::interval(secs, &output_opts)?,
            ConfigAction::Notify { state } => cli::config_cmd::notify(&state, &output_opts)?,
        },
    }

    Ok(())
}
