//! llama-stream - streaming shim for non-streaming chat-completion backends
//!
//! A reverse proxy that asks the backend for complete chat completions and
//! replays them to clients as OpenAI-style SSE streams.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use llama_stream::config::Config;
use llama_stream::proxy::run_server;

#[derive(Parser)]
#[command(name = "llama-stream")]
#[command(about = "Simulate SSE streaming in front of a non-streaming chat-completion backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(default_value = "config.toml")]
        config: String,

        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(default_value = "config.toml")]
        config: String,
    },
}

/// Initialize tracing from RUST_LOG, falling back to the configured level.
fn init_tracing(config: &Config) {
    let level = config.normalized_log_level();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.unwrap_or("info");
        format!("llama_stream={level},tower_http={level}").into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if level.is_none() {
        tracing::warn!(log_level = %config.log_level, "Invalid log level, defaulting to info");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let mut loaded = Config::from_file(&config)?;
            init_tracing(&loaded);
            tracing::info!(config = %config, "Configuration loaded successfully");

            if let Some(port) = port {
                tracing::info!(port, "Override listen port");
                loaded.proxy_port = port;
            }

            run_server(loaded).await
        }

        Commands::Check { config } => {
            let loaded = Config::from_file(&config)?;
            println!("Configuration '{}' is valid", config);
            println!("  target_url:           {}", loaded.target_url);
            println!("  verify_ssl:           {}", loaded.verify_ssl);
            match loaded.request_timeout {
                Some(secs) => println!("  request_timeout:      {}s", secs),
                None => println!("  request_timeout:      transport default"),
            }
            println!("  streaming_chunk_size: {}", loaded.streaming_chunk_size);
            println!("  proxy_port:           {}", loaded.proxy_port);
            println!("  log_level:            {}", loaded.log_level);
            Ok(())
        }
    }
}
