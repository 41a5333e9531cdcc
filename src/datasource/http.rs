//! HTTP transport seam shared by the REST and JSON-RPC providers.

use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>, content_type: &str) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Fails on non-2xx and parses the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self, context: &str) -> Result<T> {
        if !self.is_success() {
            return Err(LaserEyesError::Network(format!(
                "{context} returned HTTP {}: {}",
                self.status, self.body
            )));
        }
        serde_json::from_str(&self.body)
            .map_err(|e| LaserEyesError::Serialization(format!("{context}: failed to parse response: {e}")))
    }
}

#[cfg_attr(test, mockall::automock)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Native transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Every request fails once `timeout` elapses. The browser fetch backend
    /// has no per-request timeout, so on wasm the bound comes from the
    /// manager alone.
    pub fn new(timeout: Duration) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(timeout);
        #[cfg(target_arch = "wasm32")]
        let _ = timeout;
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// JSON-RPC 2.0 call over an [`HttpClient`].
pub async fn json_rpc_call(http: &dyn HttpClient, url: &str, method: &str, params: JsonValue) -> Result<JsonValue> {
    let payload = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    log::debug!("[JsonRpc] Making call to {url}: {method}");

    let response = http
        .send(HttpRequest::post(url, payload.to_string(), "application/json"))
        .await?;
    let json_response: JsonValue = response.json(method)?;

    if let Some(error) = json_response.get("error") {
        if !error.is_null() {
            return Err(LaserEyesError::Network(format!("{method}: {error}")));
        }
    }
    json_response
        .get("result")
        .cloned()
        .ok_or_else(|| LaserEyesError::Network(format!("{method}: response did not contain a 'result' field")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_rpc_surfaces_error_field() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.method == HttpMethod::Post && req.body.as_deref().unwrap_or("").contains("esplora_tx"))
            .returning(|_| Ok(HttpResponse::ok(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-5,"message":"not found"}}"#)));

        let err = json_rpc_call(&http, "https://rpc.example", "esplora_tx", json!(["aa"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn json_rpc_returns_result() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .returning(|_| Ok(HttpResponse::ok(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)));

        let result = json_rpc_call(&http, "https://rpc.example", "ord_rune", json!(["X"])).await.unwrap();
        assert_eq!(result["ok"], json!(true));
    }
}
