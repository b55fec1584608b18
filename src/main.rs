//! QARS server binary
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌────────────┐    ┌──────────────┐
//! │  Config  │───▶│ Acceptor │───▶│ Connection │───▶│  Dispatcher  │
//! │  (YAML)  │    │  (TCP)   │    │ (session)  │    │ (snapshots)  │
//! └──────────┘    └──────────┘    └────────────┘    └──────────────┘
//! ```
//!
//! Usage: `qars [--env dev] [--port 7277] [--data-dir ./data]`

use anyhow::{Context, Result};

use qars::config::AppConfig;
use qars::logging::init_logging;
use qars::server::{ServerHandle, Services};

// ============================================================
// ARGUMENTS
// ============================================================

#[derive(Debug, Default)]
struct Args {
    env: Option<String>,
    port: Option<u16>,
    data_dir: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env" | "-e" => parsed.env = Some(args.next().context("--env needs a value")?),
            "--port" => {
                let value = args.next().context("--port needs a value")?;
                parsed.port = Some(value.parse().with_context(|| format!("invalid port {}", value))?);
            }
            "--data-dir" => parsed.data_dir = Some(args.next().context("--data-dir needs a value")?),
            other => anyhow::bail!("unknown argument {}", other),
        }
    }
    Ok(parsed)
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let env = args.env.clone().unwrap_or_else(|| "dev".to_string());

    let mut config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    config.validate().context("validating config")?;

    let _log_guard = init_logging(&config);
    tracing::info!("Starting QARS in {} mode", env);

    let services = Services::from_config(&config);
    let server = ServerHandle::start(&config, services)
        .await
        .context("starting server")?;
    tracing::info!("Listening on {}", server.local_addr());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("Ctrl-C received");
    server.shutdown().await.context("shutting down")?;
    Ok(())
}
