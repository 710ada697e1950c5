use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use kestrel_common::config::KestrelConfig;
use kestrel_common::security::SecurityPolicy;
use kestrel_server::auth::StoreIdentityProvider;
use kestrel_server::{bootstrap_admin, serve, KestrelService};
use kestrel_store::engine::Database;

#[derive(Parser, Debug)]
#[command(name = "kestrel-server", about = "Kestrel digital-asset management service")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "kestrel.toml")]
    config: String,

    /// Listen address (overrides config).
    #[arg(long)]
    listen_addr: Option<String>,

    /// Security policy file (TOML list of allow rules).
    #[arg(long)]
    policy: Option<String>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let default_config = KestrelConfig::default();
        let toml_text = toml::to_string_pretty(&default_config)
            .unwrap_or_else(|e| format!("# failed to serialize default config: {e}"));
        println!("{toml_text}");
        return Ok(());
    }

    kestrel_observability::init_tracing();
    tracing::info!("starting kestrel...");

    let mut config = load_config(&cli.config);
    if let Some(addr) = cli.listen_addr {
        config.server.listen_addr = addr;
    }

    let policy = match &cli.policy {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read policy file {path}"))?;
            toml::from_str::<SecurityPolicy>(&text)
                .with_context(|| format!("failed to parse policy file {path}"))?
        }
        None => SecurityPolicy::deny_all(),
    };

    let database = Database::new_in_memory();
    if config.bootstrap.admin_password.is_empty() {
        tracing::warn!("no bootstrap admin password configured; no admin account created");
    } else {
        bootstrap_admin(
            &database,
            &config.bootstrap.admin_user,
            &config.bootstrap.admin_password,
        )
        .context("failed to bootstrap admin account")?;
    }

    let listen_addr = config.server.listen_addr.clone();
    let service = Arc::new(KestrelService::new(
        &config,
        database,
        policy,
        Arc::new(StoreIdentityProvider),
    ));

    serve(service, &listen_addr, shutdown_signal())
        .await
        .context("server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install signal handler: {}", e);
    }
}

fn load_config(path: &str) -> KestrelConfig {
    if !Path::new(path).exists() {
        tracing::info!("config file {} not found, using defaults", path);
        return KestrelConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(text) => match KestrelConfig::from_toml(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("failed to parse {}: {}; using defaults", path, e);
                KestrelConfig::default()
            }
        },
        Err(e) => {
            tracing::error!("failed to read {}: {}; using defaults", path, e);
            KestrelConfig::default()
        }
    }
}
