//! stackop CLI.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stackop")]
#[command(about = "Reconcile infrastructure stacks against a provisioning engine", long_about = None)]
struct Cli {
    /// Operator settings file (KDL). Falls back to environment variables.
    #[arg(long, global = true, env = "STACKOP_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file of secrets and config maps, used instead of a cluster
    #[arg(long, global = true, env = "STACKOP_SECRETS_FILE")]
    secrets_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
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
    /// Reconcile stacks from a manifest directory
    Reconcile {
        /// Directory laid out as <namespace>/<name>.json
        #[arg(long, env = "STACKOP_STACKS_DIR", default_value = "stacks")]
        stacks_dir: PathBuf,
        /// Stacks to reconcile as namespace/name (default: all)
        keys: Vec<String>,
        /// Stop retrying a conflicting stack after this many attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Validate Stack manifests without touching any backend
    Validate {
        /// Manifest files (JSON or YAML)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Resolve a resource reference and print its value
    Resolve {
        /// Reference as JSON, e.g. '{"type":"Env","env":{"name":"HOME"}}'
        reference: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Reconcile {
            stacks_dir,
            keys,
            max_attempts,
        } => {
            let config = commands::load_config(cli.config.as_deref()).await?;
            let secrets = commands::secret_store(cli.secrets_file.as_deref()).await?;
            commands::reconcile::run(&config, secrets, &stacks_dir, &keys, max_attempts).await?;
        }
        Commands::Validate { paths } => {
            commands::validate::run(&paths).await?;
        }
        Commands::Resolve { reference } => {
            let config = commands::load_config(cli.config.as_deref()).await?;
            let secrets = commands::secret_store(cli.secrets_file.as_deref()).await?;
            commands::resolve::run(&config, secrets, &reference).await?;
        }
    }

    Ok(())
}
