//! ---
//! rota_section: "01-core-functionality"
//! rota_subsection: "binary"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Binary entrypoint for the CareRota daemon."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use carerota_api::ApiServerBuilder;
use carerota_common::config::AppConfig;
use carerota_common::logging::init_tracing;
use carerota_security::rbac::parse_role;
use carerota_security::{navigation_for, permissions_for, Role, SecurityMetrics};
use clap::{Parser, Subcommand};
use prometheus::Registry;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "CareRota access core daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the authenticated API")]
    Serve,
    #[command(about = "Print the filtered navigation tree for a role")]
    Navigation {
        #[arg(long, value_parser = parse_role, help = "Role name, e.g. facility_admin")]
        role: Role,
    },
    #[command(about = "Print the permission tokens granted to a role")]
    Permissions {
        #[arg(long, value_parser = parse_role, help = "Role name, e.g. facility_admin")]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cli.config).await,
        Commands::Navigation { role } => {
            let tree = navigation_for(role).filtered(role);
            println!("{}", serde_json::to_string_pretty(&tree)?);
            Ok(())
        }
        Commands::Permissions { role } => {
            let mut tokens: Vec<String> = permissions_for(role)
                .into_iter()
                .map(|permission| permission.to_string())
                .collect();
            tokens.sort();
            for token in tokens {
                println!("{token}");
            }
            Ok(())
        }
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let mut candidates = Vec::new();
    if let Some(path) = config_path {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("configs/carerota.prod.toml"));
    candidates.push(PathBuf::from("configs/carerota.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("carerotad", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        seeded_users = config.identity.users.len(),
        "configuration loaded"
    );

    if !config.api.enabled {
        warn!("api disabled by configuration; nothing to serve");
        return Ok(());
    }

    let provider = Arc::new(config.identity.build_provider()?);
    let mut builder =
        ApiServerBuilder::new(config.api.listen, provider.clone(), provider.clone());
    if config.metrics.enabled {
        let metrics = SecurityMetrics::new(Arc::new(Registry::new()))?;
        builder = builder.with_metrics(metrics);
    } else {
        info!("metrics disabled by configuration");
    }
    let server = builder.spawn().await?;
    info!(address = %server.local_addr(), "daemon running; waiting for termination signal");

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    server.shutdown().await?;
    Ok(())
}
