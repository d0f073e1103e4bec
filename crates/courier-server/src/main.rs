// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! courier - Service Execution Container
//!
//! Hosts the built-in services next to an activity engine:
//! - registers the input message bus and local services upstream
//! - serves bus receive hooks over HTTP
//! - runs the fetch / execute / deliver loop until ctrl-c

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use courier_core::api::{HttpUpstreamApi, UpstreamApi};
use courier_core::bus::MessageBusManager;
use courier_core::config::Config;
use courier_core::resource::ResourceTracer;
use courier_core::runtime::{ContainerRuntime, bus_http_client};
use courier_core::service::ServiceFactoryRegistry;

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Service execution container")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "COURIER_CONFIG", default_value = "courier.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    let _log_guard = logging::init(&config.log)?;

    info!(
        config = %args.config.display(),
        api_url = %config.api_url,
        input_bus = config.input_message_bus.as_ref().map(|b| b.name.as_str()).unwrap_or("-"),
        local_services = config.local_service.len(),
        "Starting courier"
    );

    let api: Arc<dyn UpstreamApi> = Arc::new(
        HttpUpstreamApi::new(&config.api_url, config.api_timeout())
            .context("failed to create upstream API client")?,
    );
    let buses = Arc::new(
        MessageBusManager::new(api.clone(), config.input_message_bus.clone())
            .with_http_client(bus_http_client(&config)?),
    );
    let tracer = Arc::new(ResourceTracer::new());

    let mut factories = ServiceFactoryRegistry::new();
    courier_services::register_builtin(&mut factories, &tracer, buses.clone()).await;

    let runtime = ContainerRuntime::builder()
        .config(config)
        .api(api)
        .buses(buses)
        .tracer(tracer)
        .factories(factories)
        .build()?
        .start()
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    runtime.shutdown().await
}
