//! Event pipeline - queues events from stdin and ships them to the collector.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pipeline_config_and_utils::{init_logging, Config, Paths};

/// Event pipeline command-line interface.
#[derive(Parser)]
#[command(name = "event-pipeline")]
#[command(about = "Durable, batched event delivery to a collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, cache and logs. Defaults to ~/.event-pipeline
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read newline-delimited JSON events from stdin and ship them
    Run,
    /// Show what is waiting in the on-disk cache
    Status {
        /// Number of oldest ids to list
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, Some(paths.log_file()));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run(config, paths).await?,
        Commands::Status { limit } => app::print_status(&config, &paths, limit)?,
        Commands::Config { save } => {
            if save {
                config.save(&paths)?;
            }
            app::print_config(&config, &paths)?;
        }
    }

    Ok(())
}
