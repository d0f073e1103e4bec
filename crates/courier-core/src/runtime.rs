// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable container runtime.
//!
//! [`ContainerRuntime`] wires the registries, executor, runner and web
//! server together so the container can run inside an existing tokio
//! application as well as from the `courier` binary.
//!
//! ```rust,ignore
//! use courier_core::config::Config;
//! use courier_core::runtime::ContainerRuntime;
//! use courier_core::service::ServiceFactoryRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("courier.yaml")?;
//!     let mut factories = ServiceFactoryRegistry::new();
//!     // factories.register("echo", ...);
//!
//!     let runtime = ContainerRuntime::builder()
//!         .config(config)
//!         .factories(factories)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! Startup order: build the input bus, start the web server serving its
//! receive hook, register and open the input bus with the engine, register
//! local services, spawn the runner. Shutdown closes the runner, which
//! drains the executor and delivers what it produced, and then stops the web
//! server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{HttpUpstreamApi, UpstreamApi};
use crate::bus::MessageBusManager;
use crate::config::{Config, ExecutorKind};
use crate::executor::ServiceExecutor;
use crate::meta::ServiceMetaManager;
use crate::resource::{GC_SERVICE, ResourceTracer, register_gc};
use crate::runner::ServiceRunner;
use crate::service::ServiceFactoryRegistry;
use crate::web::{WebServerHandle, spawn_web_server};

/// Builder for [`ContainerRuntime`].
#[derive(Default)]
pub struct ContainerRuntimeBuilder {
    config: Option<Config>,
    api: Option<Arc<dyn UpstreamApi>>,
    factories: ServiceFactoryRegistry,
    tracer: Option<Arc<ResourceTracer>>,
    buses: Option<Arc<MessageBusManager>>,
}

impl ContainerRuntimeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `api` instead of an HTTP client for `config.api_url`.
    pub fn api(mut self, api: Arc<dyn UpstreamApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Set the service factories local services are built from.
    pub fn factories(mut self, factories: ServiceFactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    /// Share `tracer` with services that trace resources.
    pub fn tracer(mut self, tracer: Arc<ResourceTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Use a bus registry created ahead of time, so services built before
    /// the runtime (such as `table.to_messages`) can write to named buses.
    ///
    /// The registry must be backed by the same API passed to [`api`](Self::api).
    pub fn buses(mut self, buses: Arc<MessageBusManager>) -> Self {
        self.buses = Some(buses);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Registers the `gc` service over the tracer unless a `gc` factory is
    /// already present.
    pub fn build(self) -> Result<ContainerRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;

        let api: Arc<dyn UpstreamApi> = match self.api {
            Some(api) => api,
            None => Arc::new(
                HttpUpstreamApi::new(&config.api_url, config.api_timeout())
                    .context("failed to create upstream API client")?,
            ),
        };

        let buses = match self.buses {
            Some(buses) => buses,
            None => Arc::new(
                MessageBusManager::new(api.clone(), config.input_message_bus.clone())
                    .with_http_client(bus_http_client(&config)?),
            ),
        };

        let tracer = self.tracer.unwrap_or_default();
        let mut factories = self.factories;
        if !factories.contains(GC_SERVICE) {
            register_gc(&mut factories, tracer.clone());
        }

        Ok(ContainerRuntimeConfig {
            config,
            api,
            buses,
            factories,
            tracer,
        })
    }
}

/// HTTP client used for bus writes, bounded by the API timeout.
pub fn bus_http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.api_timeout())
        .build()
        .context("failed to create message bus HTTP client")
}

/// Configuration for a [`ContainerRuntime`].
pub struct ContainerRuntimeConfig {
    config: Config,
    api: Arc<dyn UpstreamApi>,
    buses: Arc<MessageBusManager>,
    factories: ServiceFactoryRegistry,
    tracer: Arc<ResourceTracer>,
}

impl ContainerRuntimeConfig {
    /// Start the web server, register with the engine, and spawn the runner.
    ///
    /// The web listener is bound before the engine hears about this
    /// container. If registration fails the web server is stopped again.
    pub async fn start(self) -> Result<ContainerRuntime> {
        let config = self.config;
        let buses = self.buses;

        let input = buses
            .build_input_message_bus()
            .await
            .context("failed to build input message bus")?;

        let routes = input.as_ref().and_then(|bus| bus.receive_router());
        let web = match &config.web_server {
            Some(web_config) => {
                let addr = web_config.addr()?;
                let server = spawn_web_server(addr, routes.unwrap_or_default())
                    .await
                    .with_context(|| format!("failed to bind web server on {}", addr))?;
                Some(server)
            }
            None => {
                if routes.is_some() {
                    warn!("Input message bus has a receive hook but no web_server is configured");
                }
                None
            }
        };

        let metas = Arc::new(ServiceMetaManager::new(self.api.clone()));
        if let Err(e) = register_with_engine(&config, &buses, &metas, &self.factories).await {
            if let Some(web) = web {
                web.stop().await;
            }
            return Err(e);
        }

        let executor = Arc::new(match config.runner.executor {
            ExecutorKind::Bounded => ServiceExecutor::new(config.runner.executor_workers),
        });

        let runner = Arc::new(ServiceRunner::new(
            config.runner.clone(),
            buses.clone(),
            metas.clone(),
            executor.clone(),
        ));
        let runner_task = runner.clone();
        let runner_handle = tokio::spawn(async move {
            runner_task.run().await;
        });

        info!(
            input_bus = input.as_ref().map(|b| b.name()).unwrap_or("-"),
            local_services = config.local_service.len(),
            web_addr = ?web.as_ref().map(|w| w.local_addr()),
            "ContainerRuntime started"
        );

        Ok(ContainerRuntime {
            runner,
            runner_handle,
            web,
            buses,
            metas,
            executor,
            tracer: self.tracer,
        })
    }
}

async fn register_with_engine(
    config: &Config,
    buses: &MessageBusManager,
    metas: &ServiceMetaManager,
    factories: &ServiceFactoryRegistry,
) -> Result<()> {
    let input = buses
        .register_input_message_bus()
        .await
        .context("failed to register input message bus")?;

    if !config.local_service.is_empty() {
        let input = input
            .as_ref()
            .context("local services require an input message bus")?;
        metas
            .register_all_local_service(&config.local_service, factories, input.name())
            .await
            .context("failed to register local services")?;
    }
    Ok(())
}

/// A running service container.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ContainerRuntime {
    runner: Arc<ServiceRunner>,
    runner_handle: JoinHandle<()>,
    web: Option<WebServerHandle>,
    buses: Arc<MessageBusManager>,
    metas: Arc<ServiceMetaManager>,
    executor: Arc<ServiceExecutor>,
    tracer: Arc<ResourceTracer>,
}

impl ContainerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ContainerRuntimeBuilder {
        ContainerRuntimeBuilder::new()
    }

    /// Address of the web server, if one is running.
    pub fn web_addr(&self) -> Option<SocketAddr> {
        self.web.as_ref().map(|w| w.local_addr())
    }

    /// The message bus registry.
    pub fn buses(&self) -> &Arc<MessageBusManager> {
        &self.buses
    }

    /// The service meta registry.
    pub fn metas(&self) -> &Arc<ServiceMetaManager> {
        &self.metas
    }

    /// The service executor.
    pub fn executor(&self) -> &Arc<ServiceExecutor> {
        &self.executor
    }

    /// The resource tracer shared with the `gc` service.
    pub fn tracer(&self) -> &Arc<ResourceTracer> {
        &self.tracer
    }

    /// Check if the runner is still running.
    pub fn is_running(&self) -> bool {
        !self.runner_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the runner (waiting for in-flight batches and delivering their
    /// responses), then stops the web server.
    pub async fn shutdown(self) -> Result<()> {
        info!("ContainerRuntime shutting down...");

        self.runner.close();
        let runner_result = self.runner_handle.await;

        if let Some(web) = self.web {
            web.stop().await;
        }

        match runner_result {
            Ok(()) => {
                info!("ContainerRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Service runner task panicked: {}", e);
                Err(anyhow::anyhow!("runner task panicked: {}", e))
            }
        }
    }
}
