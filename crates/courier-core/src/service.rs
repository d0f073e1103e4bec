// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service trait and the factory registry.
//!
//! A service maps a batch of requests to one result per request, in order.
//! Services that treat each request independently implement
//! [`RequestHandler`] instead and are wrapped in [`PerRequest`], which runs
//! every request on its own and turns each failure into a `sys_error` result
//! without touching its siblings.
//!
//! Services are resolved from configuration by key through a
//! [`ServiceFactoryRegistry`] populated at startup.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::error::RegistryError;
use crate::message::ServiceRequestMessage;
use crate::result::ServiceResult;

/// Errors raised by service implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// `init` rejected the service configuration.
    #[error("Service init failed: {0}")]
    Init(String),

    /// A request carried unusable arguments.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A callable mapping a batch of requests to results.
#[async_trait]
pub trait Service: Send + Sync {
    /// Prepare the service with its configured options.
    async fn init(&self, _config: &Value) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Handle `requests`, returning exactly one result per request, in order.
    async fn call(
        &self,
        requests: &[ServiceRequestMessage],
    ) -> Result<Vec<ServiceResult>, ServiceError>;
}

/// Handles one request at a time.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Prepare the handler with its configured options.
    async fn init(&self, _config: &Value) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Handle a single request.
    async fn handle(&self, request: &ServiceRequestMessage) -> Result<ServiceResult, ServiceError>;
}

/// Adapts a [`RequestHandler`] into a [`Service`] with per-request isolation.
pub struct PerRequest<H> {
    handler: H,
}

impl<H: RequestHandler> PerRequest<H> {
    /// Wrap `handler`.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: RequestHandler> Service for PerRequest<H> {
    async fn init(&self, config: &Value) -> Result<(), ServiceError> {
        self.handler.init(config).await
    }

    async fn call(
        &self,
        requests: &[ServiceRequestMessage],
    ) -> Result<Vec<ServiceResult>, ServiceError> {
        let results = join_all(requests.iter().map(|request| {
            AssertUnwindSafe(self.handler.handle(request))
                .catch_unwind()
                .map(move |outcome| match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!(
                            service = %request.receiver(),
                            activity_id = request.activity_id(),
                            action = %request.action(),
                            error = %e,
                            "Request failed"
                        );
                        ServiceResult::sys_error(e.to_string())
                    }
                    Err(_) => {
                        warn!(
                            service = %request.receiver(),
                            activity_id = request.activity_id(),
                            action = %request.action(),
                            "Request handler panicked"
                        );
                        ServiceResult::sys_error("request handler panicked")
                    }
                })
                .boxed()
        }))
        .await;
        Ok(results)
    }
}

/// A [`Service`] backed by an async closure over the request batch.
pub struct FnService<F> {
    f: F,
}

/// Build a [`Service`] from an async closure.
pub fn service_fn<F, Fut>(f: F) -> FnService<F>
where
    F: Fn(Vec<ServiceRequestMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ServiceResult>, ServiceError>> + Send + 'static,
{
    FnService { f }
}

#[async_trait]
impl<F, Fut> Service for FnService<F>
where
    F: Fn(Vec<ServiceRequestMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ServiceResult>, ServiceError>> + Send + 'static,
{
    async fn call(
        &self,
        requests: &[ServiceRequestMessage],
    ) -> Result<Vec<ServiceResult>, ServiceError> {
        (self.f)(requests.to_vec()).await
    }
}

type ServiceFactory = Arc<dyn Fn() -> Arc<dyn Service> + Send + Sync>;

/// Maps configuration keys to service constructors.
#[derive(Default, Clone)]
pub struct ServiceFactoryRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceFactoryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `key`, replacing any previous one.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// Register a shared instance under `key`.
    pub fn register_instance(&mut self, key: impl Into<String>, service: Arc<dyn Service>) -> &mut Self {
        self.register(key, move || service.clone())
    }

    /// Construct the service registered under `key`.
    pub fn create(&self, key: &str) -> Result<Arc<dyn Service>, RegistryError> {
        self.factories
            .get(key)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownServiceFactory(key.to_string()))
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
