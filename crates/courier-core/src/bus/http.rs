// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP push message bus.
//!
//! Writing POSTs the batch as a JSON array to `config.url`. The receiving
//! side exposes the same URL path as an axum route; every message posted
//! there lands in the bus buffer, which `read` drains.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::{BusError, BusInfo, MessageBuffer, MessageBus};
use crate::message::Message;
use crate::result::ServiceResult;

/// Error code answered by the receive hook when a push is rejected.
pub const HOOK_ERROR_CODE: &str = "service_error";

/// Message bus carried over HTTP.
#[derive(Debug)]
pub struct HttpMessageBus {
    info: BusInfo,
    url: Url,
    client: reqwest::Client,
    buffer: MessageBuffer,
}

impl HttpMessageBus {
    /// Build a bus from its info; `config.url` is required.
    pub fn new(info: BusInfo, client: reqwest::Client) -> Result<Self, BusError> {
        let raw = info.config_str("url").ok_or_else(|| BusError::InvalidConfig {
            bus: info.name().to_string(),
            reason: "missing url".to_string(),
        })?;
        let url = Url::parse(raw).map_err(|e| BusError::InvalidConfig {
            bus: info.name().to_string(),
            reason: format!("invalid url {}: {}", raw, e),
        })?;
        Ok(Self {
            info,
            url,
            client,
            buffer: MessageBuffer::new(),
        })
    }

    /// Target URL of writes.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MessageBus for HttpMessageBus {
    fn info(&self) -> &BusInfo {
        &self.info
    }

    async fn write(&self, messages: &[Message]) -> Result<(), BusError> {
        if messages.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(messages)
            .send()
            .await
            .map_err(|source| BusError::Http {
                bus: self.name().to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BusError::Status {
                bus: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(bus = %self.name(), count = messages.len(), "Wrote messages");
        Ok(())
    }

    async fn read(&self, max: usize) -> Result<Vec<Message>, BusError> {
        Ok(self.buffer.drain(max).await)
    }

    fn receive_router(&self) -> Option<Router> {
        let hook = HookState {
            bus: self.name().to_string(),
            tx: self.buffer.sender(),
        };
        Some(
            Router::new()
                .route(self.url.path(), post(receive))
                .with_state(hook),
        )
    }
}

#[derive(Clone)]
struct HookState {
    bus: String,
    tx: mpsc::UnboundedSender<Message>,
}

async fn receive(State(hook): State<HookState>, body: Bytes) -> Json<ServiceResult> {
    let messages: Vec<Message> = match serde_json::from_slice(&body) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(bus = %hook.bus, error = %e, "Rejected pushed messages");
            return Json(ServiceResult::fail(HOOK_ERROR_CODE, e.to_string()));
        }
    };

    let count = messages.len();
    for message in messages {
        if hook.tx.send(message).is_err() {
            return Json(ServiceResult::fail(
                HOOK_ERROR_CODE,
                format!("message bus {} is closed", hook.bus),
            ));
        }
    }

    debug!(bus = %hook.bus, count, "Received pushed messages");
    Json(ServiceResult::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServiceRequestMessage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bus(url: &str) -> HttpMessageBus {
        let info = BusInfo::new("in", "http", json!({"url": url}));
        HttpMessageBus::new(info, reqwest::Client::new()).unwrap()
    }

    fn request(x: i64) -> Message {
        ServiceRequestMessage::new("activity", "echo", 1, 1, "d", "run", json!({"x": x})).into()
    }

    async fn post_body(router: Router, uri: &str, body: String) -> Value {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_missing_url_is_invalid_config() {
        let info = BusInfo::new("out", "http", json!({}));
        let err = HttpMessageBus::new(info, reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_hook_enqueues_pushed_messages() {
        let bus = bus("http://127.0.0.1:1923/input");
        let router = bus.receive_router().unwrap();
        let body = serde_json::to_string(&vec![request(1), request(2)]).unwrap();

        let reply = post_body(router, "/input", body).await;
        assert_eq!(reply, json!({"status": "ok"}));

        let read = bus.read(10).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].receiver(), "echo");
    }

    #[tokio::test]
    async fn test_hook_rejects_malformed_body() {
        let bus = bus("http://127.0.0.1:1923/input");
        let router = bus.receive_router().unwrap();

        let reply = post_body(router, "/input", "{not json".to_string()).await;
        assert_eq!(reply["status"], "fail");
        assert_eq!(reply["error_code"], HOOK_ERROR_CODE);
        assert!(bus.read(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_posts_json_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/out"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bus = bus(&format!("{}/out", server.uri()));
        bus.write(&[request(5)]).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body[0]["type"], "req");
        assert_eq!(body[0]["attr"]["args"]["x"], 5);
    }

    #[tokio::test]
    async fn test_write_empty_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let bus = bus(&format!("{}/out", server.uri()));
        bus.write(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let bus = bus(&format!("{}/out", server.uri()));
        let err = bus.write(&[request(1)]).await.unwrap_err();
        assert!(matches!(err, BusError::Status { status: 503, .. }));
    }
}
