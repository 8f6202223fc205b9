// src/main.rs
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregation;
mod calendar;
mod config;
mod error;
mod http;
mod ingest;
mod matching;
mod models;
mod months;
mod names;
mod proration;
mod snapshot;

use crate::aggregation::{compute_availability, compute_device_aggregates};
use crate::config::Config;
use crate::http::{AppError, AppState};

/// Weekly machine availability vs production workload
#[derive(Parser, Debug)]
#[command(name = "capacity-core")]
#[command(about = "Compare machine availability with production workload per calendar month")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve {
        /// Overrides SERVER_HOST
        #[arg(long)]
        host: Option<String>,
        /// Overrides SERVER_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print device aggregates, or one device's availability, as JSON
    Report {
        /// Month in YYYY-MM form; repeat for several months
        #[arg(short, long = "month", required = true)]
        months: Vec<String>,
        #[arg(short, long)]
        device: Option<String>,
        #[arg(long)]
        prorate: bool,
    },
    /// Build the group,names display-name table from a machine register export
    MergeNames { input: PathBuf, output: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => Ok(serve(config, host, port).await?),
        Command::Report {
            months,
            device,
            prorate,
        } => report(&config, &months, device.as_deref(), prorate),
        Command::MergeNames { input, output } => {
            let groups = names::merge_names_file(&input, &output, config.delimiter()?)?;
            println!("Wrote {} group(s) to {}", groups, output.display());
            Ok(())
        }
    }
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<(), AppError> {
    let store = config.source_store()?;
    let app = http::router(AppState::new(store));

    let host = host.unwrap_or_else(|| config.server_host.clone());
    let port = port.unwrap_or(config.server_port);
    let addr: SocketAddr = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| io::Error::new(e.kind(), format!("Failed to resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| {
            AppError::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("No address for {}:{}", host, port),
            ))
        })?;

    // --- Run Web Server ---
    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .map_err(|e| {
                    AppError::TlsConfig(format!(
                        "Failed to load TLS cert {} / key {}: {}",
                        cert_path.display(),
                        key_path.display(),
                        e
                    ))
                })?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Starting server on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

fn report(
    config: &Config,
    months: &[String],
    device: Option<&str>,
    prorate: bool,
) -> anyhow::Result<()> {
    let store = config.source_store()?;
    let json = match device {
        Some(device) => {
            let result =
                store.with_tables(|tables| compute_availability(tables, device, months, prorate))?;
            serde_json::to_string_pretty(&result)?
        }
        None => {
            let result = store.with_tables(|tables| compute_device_aggregates(tables, months))?;
            serde_json::to_string_pretty(&result)?
        }
    };
    println!("{}", json);
    Ok(())
}
