//! PMEM Device Manager
//!
//! Command line front end for the device manager backends. Data commands
//! print JSON on stdout; `serve` keeps a backend open and exposes health and
//! Prometheus endpoints.

use anyhow::Context;
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pmem_device_manager::{
    parse_size, DeviceManagerFactory, DeviceManagerRef, DeviceMode, ManagerConfig,
    MeteredDeviceManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PMEM Device Manager - LVM pool and direct namespace backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "PMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Device mode (lvm, direct), overrides the configuration file
    #[arg(long, env = "PMEM_DEVICE_MODE")]
    mode: Option<DeviceMode>,

    /// Percentage of each region provisioned into volume groups
    #[arg(long, env = "PMEM_PERCENTAGE")]
    pmem_percentage: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show total, managed and available capacity
    Capacity,
    /// List all devices
    List,
    /// Show one device
    Get { volume_id: String },
    /// Allocate a device, e.g. `create pvc-1 5Gi`
    Create {
        volume_id: String,
        #[arg(value_parser = parse_size)]
        size: u64,
    },
    /// Clear and release a device
    Delete {
        volume_id: String,
        /// Erase the whole device, not just its start
        #[arg(long)]
        flush: bool,
    },
    /// Serve /healthz and /metrics
    Serve {
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(percentage) = args.pmem_percentage {
        config.pmem_percentage = percentage;
    }

    info!(
        "Starting {} {} in {} mode",
        pmem_device_manager::NAME,
        pmem_device_manager::VERSION,
        config.mode
    );

    let registry = Registry::new();
    let backend = DeviceManagerFactory::create(&config)
        .await
        .context("failed to initialize device manager")?;
    let manager: DeviceManagerRef = Arc::new(MeteredDeviceManager::new(backend, &registry)?);

    match args.command {
        Command::Capacity => print_json(&manager.capacity().await?)?,
        Command::List => print_json(&manager.list_devices().await?)?,
        Command::Get { volume_id } => print_json(&manager.get_device(&volume_id).await?)?,
        Command::Create { volume_id, size } => {
            manager
                .create_device(&volume_id, size)
                .await
                .with_context(|| format!("failed to create {}", volume_id))?;
            print_json(&manager.get_device(&volume_id).await?)?;
        }
        Command::Delete { volume_id, flush } => {
            manager
                .delete_device(&volume_id, flush)
                .await
                .with_context(|| format!("failed to delete {}", volume_id))?;
        }
        Command::Serve { addr } => run_server(addr, manager, registry).await?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Health and Metrics Server
// =============================================================================

async fn run_server(
    addr: SocketAddr,
    manager: DeviceManagerRef,
    registry: Registry,
) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;

    let make_svc = make_service_fn(move |_conn| {
        let manager = manager.clone();
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, manager.clone(), registry.clone())
            }))
        }
    });

    info!("Health and metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn handle(
    req: hyper::Request<hyper::Body>,
    manager: DeviceManagerRef,
    registry: Registry,
) -> Result<hyper::Response<hyper::Body>, Infallible> {
    use hyper::{Body, Response, StatusCode};

    let response = match req.uri().path() {
        "/healthz" | "/livez" => Response::new(Body::from("ok")),
        "/metrics" => {
            // Refresh the capacity gauges on every scrape
            if let Err(e) = manager.capacity().await {
                warn!("Capacity query failed: {}", e);
            }

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&registry.gather(), &mut buffer) {
                Ok(()) => {
                    let mut response = Response::new(Body::from(buffer));
                    if let Ok(value) = encoder.format_type().parse() {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => {
                    let mut response = Response::new(Body::from(e.to_string()));
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    response
                }
            }
        }
        _ => {
            let mut response = Response::new(Body::from("not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };

    Ok(response)
}
