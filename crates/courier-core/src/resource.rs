// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Temporary resource tracing.
//!
//! Services that create per-activity resources (temporary tables, texts,
//! sessions) trace them under the owning `(activity_id, domain_id)`. When the
//! engine reports that the activity thread finished or failed, the `gc`
//! service releases everything traced under that key, in insertion order,
//! through the handler registered for each resource type.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::message::ServiceRequestMessage;
use crate::result::ServiceResult;
use crate::service::{PerRequest, RequestHandler, Service, ServiceError, ServiceFactoryRegistry};

/// Factory key of the `gc` service.
pub const GC_SERVICE: &str = "gc";

/// Releases one kind of resource.
#[async_trait]
pub trait ReleaseHandler: Send + Sync {
    /// Release the resource `name` owned by the given activity thread.
    async fn release(&self, activity_id: i64, domain_id: &str, name: &str) -> anyhow::Result<()>;
}

/// A [`ReleaseHandler`] backed by an async closure.
pub struct FnReleaseHandler<F> {
    f: F,
}

impl<F, Fut> FnReleaseHandler<F>
where
    F: Fn(i64, String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Wrap `f`, called as `f(activity_id, domain_id, name)`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ReleaseHandler for FnReleaseHandler<F>
where
    F: Fn(i64, String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn release(&self, activity_id: i64, domain_id: &str, name: &str) -> anyhow::Result<()> {
        (self.f)(activity_id, domain_id.to_string(), name.to_string()).await
    }
}

/// A traced resource reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedResource {
    /// Resource type; selects the release handler.
    pub kind: String,
    /// Resource name, passed to the handler.
    pub name: String,
}

type TraceKey = (i64, String);

/// Tracks temporary resources per activity thread.
#[derive(Default)]
pub struct ResourceTracer {
    traced: Mutex<HashMap<TraceKey, Vec<TracedResource>>>,
    handlers: RwLock<HashMap<String, Arc<dyn ReleaseHandler>>>,
}

impl ResourceTracer {
    /// Empty tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource. Duplicates are kept and each is released.
    pub async fn trace(&self, activity_id: i64, domain_id: &str, kind: &str, name: &str) {
        self.traced
            .lock()
            .await
            .entry((activity_id, domain_id.to_string()))
            .or_default()
            .push(TracedResource {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        debug!(activity_id, domain_id, kind, name, "Traced resource");
    }

    /// Set the release handler for `kind`, replacing any previous one.
    pub async fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn ReleaseHandler>) {
        self.handlers.write().await.insert(kind.into(), handler);
    }

    /// Resources currently traced for an activity thread.
    pub async fn traced(&self, activity_id: i64, domain_id: &str) -> Vec<TracedResource> {
        self.traced
            .lock()
            .await
            .get(&(activity_id, domain_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Release everything traced for an activity thread, in insertion order.
    ///
    /// A failing release is logged and does not stop the rest. The key is
    /// forgotten afterwards whether or not every release succeeded. Returns
    /// the number of successful releases.
    pub async fn free_all(&self, activity_id: i64, domain_id: &str) -> usize {
        let Some(resources) = self
            .traced
            .lock()
            .await
            .remove(&(activity_id, domain_id.to_string()))
        else {
            return 0;
        };

        let mut released = 0;
        for resource in &resources {
            let handler = self.handlers.read().await.get(&resource.kind).cloned();
            let Some(handler) = handler else {
                warn!(
                    activity_id,
                    domain_id,
                    kind = %resource.kind,
                    name = %resource.name,
                    "No release handler for resource type"
                );
                continue;
            };
            match handler.release(activity_id, domain_id, &resource.name).await {
                Ok(()) => released += 1,
                Err(e) => error!(
                    activity_id,
                    domain_id,
                    kind = %resource.kind,
                    name = %resource.name,
                    error = %e,
                    "Failed to release resource"
                ),
            }
        }

        info!(
            activity_id,
            domain_id,
            released,
            total = resources.len(),
            "Released activity resources"
        );
        released
    }
}

/// Activity thread lifecycle event carried in `args.event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The activity thread finished.
    Finished,
    /// The activity thread failed.
    Failed,
    /// Any other event.
    Other(String),
}

impl LifecycleEvent {
    /// Parse an event name.
    pub fn parse(event: &str) -> Self {
        match event {
            "finished" => LifecycleEvent::Finished,
            "failure" | "failed" => LifecycleEvent::Failed,
            other => LifecycleEvent::Other(other.to_string()),
        }
    }

    /// Event of a `gc` request; a missing event is `Other("")`.
    pub fn from_request(request: &ServiceRequestMessage) -> Self {
        Self::parse(
            request
                .arg("event")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default(),
        )
    }

    /// Whether resources should be released.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleEvent::Finished | LifecycleEvent::Failed)
    }
}

/// Releases an activity thread's resources when it finishes or fails.
pub struct GcService {
    tracer: Arc<ResourceTracer>,
}

impl GcService {
    /// Build over `tracer`.
    pub fn new(tracer: Arc<ResourceTracer>) -> Self {
        Self { tracer }
    }
}

#[async_trait]
impl RequestHandler for GcService {
    async fn handle(&self, request: &ServiceRequestMessage) -> Result<ServiceResult, ServiceError> {
        match LifecycleEvent::from_request(request) {
            event if event.is_terminal() => {
                self.tracer
                    .free_all(request.activity_id(), request.domain_id())
                    .await;
            }
            LifecycleEvent::Other(event) => {
                warn!(
                    activity_id = request.activity_id(),
                    domain_id = %request.domain_id(),
                    event = %event,
                    "Ignoring unrecognised lifecycle event"
                );
            }
            _ => {}
        }
        Ok(ServiceResult::ok())
    }
}

/// Register the `gc` service over `tracer`.
pub fn register_gc(registry: &mut ServiceFactoryRegistry, tracer: Arc<ResourceTracer>) {
    let service: Arc<dyn Service> = Arc::new(PerRequest::new(GcService::new(tracer)));
    registry.register_instance(GC_SERVICE, service);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    type Calls = Arc<StdMutex<Vec<(i64, String, String)>>>;

    fn recorder(calls: Calls) -> Arc<dyn ReleaseHandler> {
        Arc::new(FnReleaseHandler::new(move |activity_id, domain_id, name: String| {
            let calls = calls.clone();
            async move {
                if name == "broken" {
                    anyhow::bail!("cannot release {}", name);
                }
                calls.lock().unwrap().push((activity_id, domain_id, name));
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_free_all_in_insertion_order() {
        let tracer = ResourceTracer::new();
        let calls: Calls = Arc::default();
        tracer.register_handler("memory_table", recorder(calls.clone())).await;

        tracer.trace(1, "d", "memory_table", "a").await;
        tracer.trace(1, "d", "memory_table", "b").await;
        tracer.trace(1, "d", "memory_table", "a").await;
        tracer.trace(2, "d", "memory_table", "other").await;

        assert_eq!(tracer.free_all(1, "d").await, 3);
        let names: Vec<String> = calls.lock().unwrap().iter().map(|c| c.2.clone()).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
        assert_eq!(tracer.traced(2, "d").await.len(), 1);
    }

    #[tokio::test]
    async fn test_free_all_twice_is_noop() {
        let tracer = ResourceTracer::new();
        let calls: Calls = Arc::default();
        tracer.register_handler("t", recorder(calls.clone())).await;
        tracer.trace(1, "d", "t", "x").await;

        assert_eq!(tracer.free_all(1, "d").await, 1);
        assert_eq!(tracer.free_all(1, "d").await, 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_failure_does_not_stop_others() {
        let tracer = ResourceTracer::new();
        let calls: Calls = Arc::default();
        tracer.register_handler("t", recorder(calls.clone())).await;
        tracer.trace(1, "d", "t", "broken").await;
        tracer.trace(1, "d", "unregistered", "y").await;
        tracer.trace(1, "d", "t", "ok").await;

        assert_eq!(tracer.free_all(1, "d").await, 1);
        assert_eq!(calls.lock().unwrap()[0].2, "ok");
        assert!(tracer.traced(1, "d").await.is_empty());
    }

    #[test]
    fn test_lifecycle_event_parse() {
        assert_eq!(LifecycleEvent::parse("finished"), LifecycleEvent::Finished);
        assert_eq!(LifecycleEvent::parse("failure"), LifecycleEvent::Failed);
        assert_eq!(LifecycleEvent::parse("failed"), LifecycleEvent::Failed);
        assert_eq!(
            LifecycleEvent::parse("paused"),
            LifecycleEvent::Other("paused".into())
        );
    }

    #[tokio::test]
    async fn test_gc_service_frees_on_terminal_events_only() {
        let tracer = Arc::new(ResourceTracer::new());
        let calls: Calls = Arc::default();
        tracer.register_handler("t", recorder(calls.clone())).await;
        tracer.trace(1, "d", "t", "x").await;

        let mut registry = ServiceFactoryRegistry::new();
        register_gc(&mut registry, tracer.clone());
        let gc = registry.create(GC_SERVICE).unwrap();

        let event = |e: &str| {
            ServiceRequestMessage::new("activity", "gc", 0, 1, "d", "event", json!({"event": e}))
        };

        let results = gc.call(&[event("paused")]).await.unwrap();
        assert!(results[0].is_ok());
        assert_eq!(tracer.traced(1, "d").await.len(), 1);

        let results = gc.call(&[event("failure")]).await.unwrap();
        assert!(results[0].is_ok());
        assert!(tracer.traced(1, "d").await.is_empty());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}
