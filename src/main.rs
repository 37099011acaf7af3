//! concord - Multi-provider LLM routing with response consensus
//!
//! Fans a prompt out to several models, waits for a quorum and returns the
//! answer they agree on.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concord::config::Config;

#[derive(Parser)]
#[command(name = "concord")]
#[command(about = "Multi-provider LLM routing with response consensus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured models and their composite scores
    Models {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// RUST_LOG wins; otherwise `level` applies to concord and tower_http.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("concord={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "loaded configuration");

            for (provider, source) in &key_sources {
                tracing::debug!(provider = %provider, source = %source, "resolved api key");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "override listen address");
                cfg.server.listen = addr;
            }

            concord::server::run_server(cfg).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;

            println!("Configuration OK: {}", config);
            println!("  listen: {}", cfg.server.listen);
            println!(
                "  routing: strategy={} quorum={}..={} timeout={}s",
                cfg.routing.default_strategy,
                cfg.routing.min_responses,
                cfg.routing.max_responses,
                cfg.routing.timeout_secs
            );
            for (provider, source) in &key_sources {
                println!("  provider {}: api key {}", provider, source);
            }
            println!("  models: {}", cfg.models.len());
            Ok(())
        }

        Commands::Models { config } => {
            init_tracing("warn");
            let (cfg, _) = Config::from_file_with_env(&config)?;
            let selector = cfg.build_selector();

            println!(
                "{:<40} {:>8} {:>12} {:>10}",
                "MODEL", "WEIGHT", "COST/UNIT", "SCORE"
            );
            for model in selector.list_models() {
                println!(
                    "{:<40} {:>8.2} {:>12.6} {:>10.3}",
                    model.key.to_string(),
                    model.weight,
                    model.cost_per_unit,
                    selector.composite_score(&model)
                );
            }
            Ok(())
        }
    }
}
