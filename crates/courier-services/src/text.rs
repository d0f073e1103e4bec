// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `text` service: named text buffers per activity thread.
//!
//! | Type | Storage |
//! |------|---------|
//! | `memory_text` | in-process string |
//! | `file_text` | local file at `meta.path` |
//!
//! Actions: `declare`, `write`, `append`, `read`, `drop`. The text is
//! referenced by `args.text`; `write` and `append` take `args.content`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::resource::{FnReleaseHandler, ResourceTracer};
use courier_core::{RequestHandler, ServiceError, ServiceRequestMessage, ServiceResult};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::resource_ref::{ResourceRef, full_name};

/// Text store types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    /// `memory_text`
    Memory,
    /// `file_text`
    File,
}

impl TextKind {
    /// All supported types.
    pub const ALL: [TextKind; 2] = [TextKind::Memory, TextKind::File];

    /// Resolve a type string.
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "memory_text" => Ok(TextKind::Memory),
            "file_text" => Ok(TextKind::File),
            other => Err(StoreError::UnknownType {
                family: "text",
                kind: other.to_string(),
            }),
        }
    }

    /// The type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TextKind::Memory => "memory_text",
            TextKind::File => "file_text",
        }
    }
}

#[derive(Debug, Clone)]
enum TextStore {
    Memory(String),
    File(PathBuf),
}

/// Registered texts, keyed by type and full name.
#[derive(Debug, Default)]
pub struct TextRegistry {
    texts: Mutex<HashMap<(TextKind, String), TextStore>>,
}

impl TextRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a text, replacing an existing one of the same name.
    ///
    /// A memory text starts empty. A file text needs `meta.path`; the file
    /// is not touched until the first write.
    pub async fn declare(&self, kind: TextKind, key: &str, reference: &ResourceRef) -> Result<()> {
        let store = match kind {
            TextKind::Memory => TextStore::Memory(String::new()),
            TextKind::File => {
                let path = reference
                    .meta_str("path")
                    .ok_or_else(|| StoreError::invalid_args("file_text requires meta.path"))?;
                TextStore::File(PathBuf::from(path))
            }
        };
        self.texts.lock().await.insert((kind, key.to_string()), store);
        Ok(())
    }

    /// Current content.
    pub async fn read(&self, kind: TextKind, key: &str) -> Result<String> {
        match self.locate(kind, key).await? {
            TextStore::Memory(text) => Ok(text),
            TextStore::File(path) => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    /// Replace the content.
    pub async fn write(&self, kind: TextKind, key: &str, content: &str) -> Result<()> {
        match kind {
            TextKind::Memory => {
                let mut texts = self.texts.lock().await;
                match texts.get_mut(&(kind, key.to_string())) {
                    Some(TextStore::Memory(text)) => {
                        text.clear();
                        text.push_str(content);
                        Ok(())
                    }
                    _ => Err(not_found(kind, key)),
                }
            }
            TextKind::File => {
                let path = self.file_path(key).await?;
                tokio::fs::write(path, content).await?;
                Ok(())
            }
        }
    }

    /// Append to the content.
    pub async fn append(&self, kind: TextKind, key: &str, content: &str) -> Result<()> {
        match kind {
            TextKind::Memory => {
                let mut texts = self.texts.lock().await;
                match texts.get_mut(&(kind, key.to_string())) {
                    Some(TextStore::Memory(text)) => {
                        text.push_str(content);
                        Ok(())
                    }
                    _ => Err(not_found(kind, key)),
                }
            }
            TextKind::File => {
                let path = self.file_path(key).await?;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                Ok(())
            }
        }
    }

    /// Forget a text. A file text's file is left in place.
    pub async fn drop_text(&self, kind: TextKind, key: &str) -> Result<()> {
        self.texts
            .lock()
            .await
            .remove(&(kind, key.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, key))
    }

    /// Whether a text is registered.
    pub async fn contains(&self, kind: TextKind, key: &str) -> bool {
        self.texts.lock().await.contains_key(&(kind, key.to_string()))
    }

    async fn locate(&self, kind: TextKind, key: &str) -> Result<TextStore> {
        self.texts
            .lock()
            .await
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or_else(|| not_found(kind, key))
    }

    async fn file_path(&self, key: &str) -> Result<PathBuf> {
        match self.locate(TextKind::File, key).await? {
            TextStore::File(path) => Ok(path),
            TextStore::Memory(_) => Err(not_found(TextKind::File, key)),
        }
    }
}

fn not_found(kind: TextKind, key: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.as_str().to_string(),
        name: key.to_string(),
    }
}

/// Let the tracer drop temporary texts when their activity thread ends.
pub async fn register_release_handlers(texts: &Arc<TextRegistry>, tracer: &ResourceTracer) {
    for kind in TextKind::ALL {
        let texts = texts.clone();
        let handler = FnReleaseHandler::new(move |activity_id, domain_id: String, name: String| {
            let texts = texts.clone();
            async move {
                texts
                    .drop_text(kind, &full_name(activity_id, &domain_id, &name))
                    .await
                    .map_err(anyhow::Error::from)
            }
        });
        tracer.register_handler(kind.as_str(), Arc::new(handler)).await;
    }
}

/// Handler behind the `text` service.
pub struct TextService {
    texts: Arc<TextRegistry>,
    tracer: Arc<ResourceTracer>,
}

impl TextService {
    /// Build over a shared registry and tracer.
    pub fn new(texts: Arc<TextRegistry>, tracer: Arc<ResourceTracer>) -> Self {
        Self { texts, tracer }
    }

    async fn dispatch(&self, request: &ServiceRequestMessage) -> Result<ServiceResult> {
        let reference = ResourceRef::from_request(request, "text")?;
        let kind = TextKind::parse(&reference.kind)?;
        let key = full_name(request.activity_id(), request.domain_id(), &reference.name);

        match request.action() {
            "declare" => {
                self.texts.declare(kind, &key, &reference).await?;
                if reference.tmp {
                    self.tracer
                        .trace(request.activity_id(), request.domain_id(), kind.as_str(), &reference.name)
                        .await;
                }
                debug!(text = %key, kind = kind.as_str(), tmp = reference.tmp, "Declared text");
                Ok(ServiceResult::ok())
            }
            "write" => {
                let content = content_arg(request)?;
                self.texts
                    .write(kind, &key, content.unwrap_or_default())
                    .await?;
                Ok(ServiceResult::ok())
            }
            "append" => {
                if let Some(content) = content_arg(request)? {
                    self.texts.append(kind, &key, content).await?;
                }
                Ok(ServiceResult::ok())
            }
            "read" => {
                let text = self.texts.read(kind, &key).await?;
                Ok(ServiceResult::ok_with(json!({ "text": text })))
            }
            "drop" => {
                self.texts.drop_text(kind, &key).await?;
                Ok(ServiceResult::ok())
            }
            other => Err(StoreError::UnknownAction(other.to_string())),
        }
    }
}

fn content_arg(request: &ServiceRequestMessage) -> Result<Option<&str>> {
    match request.arg("content") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(StoreError::invalid_args("'content' must be a string")),
    }
}

#[async_trait]
impl RequestHandler for TextService {
    async fn handle(&self, request: &ServiceRequestMessage) -> std::result::Result<ServiceResult, ServiceError> {
        Ok(self.dispatch(request).await.unwrap_or_else(ServiceResult::from))
    }
}
