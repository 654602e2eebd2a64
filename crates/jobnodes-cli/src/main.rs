//! jobnodes — operate the on-demand node provisioner from the command line.
//!
//! ```text
//! jobnodes check-config --config provisioner.toml
//! jobnodes resolve --config provisioner.toml --label linux
//! jobnodes simulate --config provisioner.toml --label linux --queue 3 --ticks 5
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "jobnodes",
    about = "On-demand compute-node provisioning",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a provisioner configuration file.
    CheckConfig {
        #[arg(short, long, default_value = "provisioner.toml")]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Show the job names, image and git URL a label resolves to.
    Resolve {
        #[arg(short, long, default_value = "provisioner.toml")]
        config: PathBuf,
        #[arg(short, long)]
        label: String,
    },
    /// Run the provisioner against an in-memory host.
    ///
    /// Queues work for a label, ticks the provisioner, launches every node
    /// it creates and finally tears them all down.
    Simulate {
        #[arg(short, long, default_value = "provisioner.toml")]
        config: PathBuf,
        #[arg(short, long)]
        label: String,
        /// Items to queue for the label.
        #[arg(short, long, default_value = "3")]
        queue: u32,
        /// Provisioner ticks to run.
        #[arg(short, long, default_value = "5")]
        ticks: u32,
        /// Concurrent node creations.
        #[arg(long, default_value = "4")]
        workers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::CheckConfig { config, format } => commands::config::check(&config, &format),
        Commands::Resolve { config, label } => commands::config::resolve(&config, &label),
        Commands::Simulate {
            config,
            label,
            queue,
            ticks,
            workers,
        } => {
            let options = commands::simulate::SimulateOptions {
                label,
                queue,
                ticks,
                workers,
            };
            commands::simulate::run(&config, options).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jobnodes=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
