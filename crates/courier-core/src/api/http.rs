// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP implementation of [`UpstreamApi`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{ApiError, BusDescriptor, UpstreamApi};
use crate::meta::ServiceMeta;
use crate::result::ServiceResult;

#[derive(Debug, Default, Deserialize)]
struct BusList {
    #[serde(default)]
    buses: Vec<BusDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceList {
    #[serde(default)]
    services: Vec<ServiceMeta>,
}

/// Upstream API client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUpstreamApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUpstreamApi {
    /// Create a client for the engine at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    /// The engine base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        body: Value,
    ) -> Result<ServiceResult, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, operation, "Calling upstream API");
        let response = self.client.post(url).json(&body).send().await?;
        decode(operation, response).await
    }

    async fn get(&self, operation: &'static str, path: &str) -> Result<ServiceResult, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, operation, "Calling upstream API");
        let response = self.client.get(url).send().await?;
        decode(operation, response).await
    }
}

/// Decode an engine reply and turn a non-`ok` status into an error.
async fn decode(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<ServiceResult, ApiError> {
    let http_status = response.status();
    let result: ServiceResult = response.json().await.map_err(|e| ApiError::Decode {
        operation,
        reason: format!("HTTP {}: {}", http_status, e),
    })?;
    if !result.is_ok() {
        return Err(ApiError::Rejected {
            operation,
            status: result.status.to_string(),
            error_code: result.error_code,
            message: result.message,
        });
    }
    Ok(result)
}

fn data_as<T: DeserializeOwned + Default>(
    operation: &'static str,
    result: ServiceResult,
) -> Result<T, ApiError> {
    if result.data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(result.data).map_err(|e| ApiError::Decode {
        operation,
        reason: e.to_string(),
    })
}

#[async_trait]
impl UpstreamApi for HttpUpstreamApi {
    async fn register_message_bus(&self, config: &Value) -> Result<(), ApiError> {
        self.post(
            "register_message_bus",
            "/v1/message_bus/register",
            json!({ "config": config }),
        )
        .await?;
        Ok(())
    }

    async fn open_message_bus(&self, name: &str) -> Result<(), ApiError> {
        self.post(
            "open_message_bus",
            "/v1/message_bus/open",
            json!({ "name": name }),
        )
        .await?;
        Ok(())
    }

    async fn all_message_buses(&self) -> Result<Vec<BusDescriptor>, ApiError> {
        let result = self.get("all_message_buses", "/v1/message_bus/all").await?;
        let list: BusList = data_as("all_message_buses", result)?;
        Ok(list.buses)
    }

    async fn register_service_meta(&self, meta: &ServiceMeta) -> Result<(), ApiError> {
        self.post(
            "register_service_meta",
            "/v1/service_meta/register",
            json!({
                "name": meta.name,
                "message_bus": meta.message_bus,
                "config": meta.config,
            }),
        )
        .await?;
        Ok(())
    }

    async fn all_service_metas(&self) -> Result<Vec<ServiceMeta>, ApiError> {
        let result = self.get("all_service_metas", "/v1/service_meta/all").await?;
        let list: ServiceList = data_as("all_service_metas", result)?;
        Ok(list.services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> HttpUpstreamApi {
        HttpUpstreamApi::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_register_message_bus_sends_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/message_bus/register"))
            .and(body_json(json!({"config": {"name": "in", "class": "http"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server).await;
        api.register_message_bus(&json!({"name": "in", "class": "http"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_already_opened_is_rejection_with_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/message_bus/open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"status": "fail", "error_code": "already_opened"}),
            ))
            .mount(&server)
            .await;

        let api = client(&server).await;
        let err = api.open_message_bus("in").await.unwrap_err();
        assert_eq!(err.error_code(), Some("already_opened"));
    }

    #[tokio::test]
    async fn test_all_message_buses_decodes_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/message_bus/all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "data": {"buses": [{
                    "name": "out",
                    "class": "http",
                    "alive": true,
                    "opened": true,
                    "available": false,
                    "config": {"url": "http://x/out"}
                }]}
            })))
            .mount(&server)
            .await;

        let api = client(&server).await;
        let buses = api.all_message_buses().await.unwrap();
        assert_eq!(buses.len(), 1);
        assert_eq!(buses[0].name, "out");
        assert!(buses[0].opened);
        assert!(!buses[0].available);
        assert_eq!(buses[0].config["url"], "http://x/out");
    }

    #[tokio::test]
    async fn test_all_service_metas_missing_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/service_meta/all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let api = client(&server).await;
        assert!(api.all_service_metas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_service_meta_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/service_meta/register"))
            .and(body_json(
                json!({"name": "echo", "message_bus": "in", "config": {}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server).await;
        api.register_service_meta(&ServiceMeta::new("echo", "in", json!({})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_json_reply_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/message_bus/all"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let api = client(&server).await;
        let err = api.all_message_buses().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
