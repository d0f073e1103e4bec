// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service meta registry.
//!
//! Maps service names to the bus their responses go to. Local metas also
//! carry the bound [`Service`] and are the only ones this process executes;
//! remote metas come from the engine and are used for routing only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{ApiError, UpstreamApi};
use crate::config::LocalServiceConfig;
use crate::error::{RegistryError, Result};
use crate::service::{Service, ServiceFactoryRegistry};

/// Routing metadata for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMeta {
    /// Unique service name.
    pub name: String,
    /// Bus that messages for this service are delivered to.
    pub message_bus: String,
    /// Service configuration.
    #[serde(default)]
    pub config: Value,
}

impl ServiceMeta {
    /// Build a meta.
    pub fn new(name: impl Into<String>, message_bus: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            message_bus: message_bus.into(),
            config,
        }
    }
}

/// A service hosted by this process.
#[derive(Clone)]
pub struct LocalServiceMeta {
    meta: ServiceMeta,
    service: Arc<dyn Service>,
}

impl LocalServiceMeta {
    /// Bind `service` to `meta`.
    pub fn new(meta: ServiceMeta, service: Arc<dyn Service>) -> Self {
        Self { meta, service }
    }

    /// Routing metadata.
    pub fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The bound service.
    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }
}

impl std::fmt::Debug for LocalServiceMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServiceMeta")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Registry of local and remote service metas.
pub struct ServiceMetaManager {
    api: Arc<dyn UpstreamApi>,
    local: RwLock<HashMap<String, LocalServiceMeta>>,
    remote: RwLock<HashMap<String, ServiceMeta>>,
}

impl ServiceMetaManager {
    /// Create an empty registry.
    pub fn new(api: Arc<dyn UpstreamApi>) -> Self {
        Self {
            api,
            local: RwLock::new(HashMap::new()),
            remote: RwLock::new(HashMap::new()),
        }
    }

    /// Construct, initialise and register every declared local service.
    ///
    /// Each service is bound to `input_bus`, the bus this process reads
    /// requests from. Stops at the first failure.
    pub async fn register_all_local_service(
        &self,
        declarations: &[LocalServiceConfig],
        factories: &ServiceFactoryRegistry,
        input_bus: &str,
    ) -> Result<()> {
        for declaration in declarations {
            let service = factories.create(&declaration.service)?;
            service.init(&declaration.config).await?;
            let meta = ServiceMeta::new(
                declaration.name.clone(),
                input_bus,
                declaration.config.clone(),
            );
            self.register_local_service(meta, service).await?;
        }
        Ok(())
    }

    /// Register one local service with the engine and locally.
    pub async fn register_local_service(
        &self,
        meta: ServiceMeta,
        service: Arc<dyn Service>,
    ) -> std::result::Result<(), ApiError> {
        self.api.register_service_meta(&meta).await?;
        info!(service = %meta.name, message_bus = %meta.message_bus, "Registered local service");
        self.local
            .write()
            .await
            .insert(meta.name.clone(), LocalServiceMeta::new(meta, service));
        Ok(())
    }

    /// Replace the remote snapshot with the engine's service list.
    ///
    /// Local metas are untouched.
    pub async fn refresh_all(&self) -> std::result::Result<(), ApiError> {
        let snapshot = self.api.all_service_metas().await?;
        let remote: HashMap<String, ServiceMeta> = snapshot
            .into_iter()
            .map(|meta| (meta.name.clone(), meta))
            .collect();
        debug!(count = remote.len(), "Refreshed service metas");
        *self.remote.write().await = remote;
        Ok(())
    }

    /// Look up a service meta, preferring the local registration.
    pub async fn get_service_meta(&self, name: &str) -> std::result::Result<ServiceMeta, RegistryError> {
        if let Some(local) = self.local.read().await.get(name) {
            return Ok(local.meta.clone());
        }
        self.remote
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))
    }

    /// Look up a service hosted by this process.
    pub async fn get_local_service_meta(
        &self,
        name: &str,
    ) -> std::result::Result<LocalServiceMeta, RegistryError> {
        self.local
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownLocalService(name.to_string()))
    }

    /// Names of local services, sorted.
    pub async fn local_service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.local.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
