//! Furnace: deployment trigger and dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use furnace_config::{CommonSettings, ExecSettings, TriggerSettings};
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "furnace")]
#[command(about = "Furnace deployment trigger and dispatch", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "FURNACE_LOG_FORMAT", value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger stage HTTP endpoint
    Serve {
        #[command(flatten)]
        common: CommonSettings,
        #[command(flatten)]
        trigger: TriggerSettings,
    },
    /// Run the exec stage consumer
    Exec {
        #[command(flatten)]
        common: CommonSettings,
        #[command(flatten)]
        exec: ExecSettings,
    },
    /// Run both stages in one process over the in-memory bus
    Standalone {
        #[command(flatten)]
        common: CommonSettings,
        #[command(flatten)]
        trigger: TriggerSettings,
        #[command(flatten)]
        exec: ExecSettings,
    },
    /// Ask a running trigger endpoint to deploy a stack
    Trigger {
        /// Trigger endpoint URL
        #[arg(long, env = "FURNACE_URL", default_value = "http://localhost:3000/")]
        url: Url,
        /// API key sent as x-api-key
        #[arg(long, env = "FURNACE_API_KEY", hide_env_values = true)]
        api_key: String,
        /// Git remote of the stack repository
        #[arg(long)]
        remote_url: String,
        /// Commit, tag or branch to read the manifest at
        #[arg(long)]
        commit_ref: String,
        /// Target environment
        #[arg(long)]
        environment: String,
    },
    /// Validate a stack manifest and print its environments
    Validate {
        /// Path to the manifest
        #[arg(default_value = "stack.yaml")]
        path: String,
    },
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { common, trigger } => {
            init_tracing(cli.log_format);
            commands::serve::run(common, trigger).await?;
        }
        Commands::Exec { common, exec } => {
            init_tracing(cli.log_format);
            commands::exec::run(common, exec).await?;
        }
        Commands::Standalone {
            common,
            trigger,
            exec,
        } => {
            init_tracing(cli.log_format);
            commands::standalone::run(common, trigger, exec).await?;
        }
        Commands::Trigger {
            url,
            api_key,
            remote_url,
            commit_ref,
            environment,
        } => {
            commands::trigger::run(&url, &api_key, &remote_url, &commit_ref, &environment).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
