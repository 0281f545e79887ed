//! routerhostd — the routerhost daemon.
//!
//! Single binary that assembles every subsystem:
//! - State store (redb)
//! - Hosting device manager + pool maintainer
//! - Router binding manager + backlog sweeper
//! - Liveness tracker + monitor
//! - REST API
//!
//! # Usage
//!
//! ```text
//! routerhostd serve --config /etc/routerhost/routerhost.toml
//! routerhostd default-config > routerhost.toml
//! ```

mod daemon;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use routerhost_core::RouterHostConfig;

#[derive(Parser)]
#[command(name = "routerhostd", about = "routerhost daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, liveness monitor and API server.
    Serve {
        /// Path to routerhost.toml. Built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<String>,

        /// Override `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            listen,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => RouterHostConfig::from_file(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => RouterHostConfig::default(),
            };
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            config.validate()?;
            daemon::run(config).await
        }
        Command::DefaultConfig => {
            print!("{}", RouterHostConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,routerhostd=debug,routerhost=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
