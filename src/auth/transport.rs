//! HTTP transport seam
//!
//! The coordinator never talks to reqwest directly; it hands an [`ApiRequest`]
//! to an [`HttpTransport`]. Requests are plain owned data so the same request
//! can be re-issued after a token refresh.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ApiError;

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartUpload),
}

/// A single-file multipart upload plus extra text fields
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub file_field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

/// Outgoing API request, relative to the configured base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, upload: MultipartUpload) -> Self {
        self.body = RequestBody::Multipart(upload);
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

/// Response as seen by the coordinator: status plus the full body
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::ParseError(format!("Invalid response body: {}", e)))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }
}

/// Executes one HTTP exchange. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&SecretString>,
    ) -> Result<ApiResponse, ApiError>;
}

/// Production transport backed by reqwest
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: url::Url,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = url::Url::parse(&config.normalized_base_url())
            .map_err(|e| ApiError::InvalidConfig(format!("Invalid API base URL: {}", e)))?;

        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Resolve a relative API path against the base URL
    fn resolve(&self, request: &ApiRequest) -> Result<url::Url, ApiError> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidConfig(format!("Invalid request path {}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&SecretString>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.resolve(request)?;
        debug!("HTTP {} {}", request.method, url.path());

        let mut builder = self.client.request(request.method.clone(), url);

        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| ApiError::InvalidConfig(format!("Invalid token: {}", e)))?;
            builder = builder.header(AUTHORIZATION, value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(upload) => {
                let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
                    .file_name(upload.file_name.clone());
                let mut form = reqwest::multipart::Form::new().part(upload.file_field.clone(), part);
                for (key, value) in &upload.fields {
                    form = form.text(key.clone(), value.clone());
                }
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::NetworkFailure(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::NetworkFailure(format!("Failed to read response: {}", e)))?;

        debug!("HTTP {} {} -> {}", request.method, request.path, status);
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_keeps_base_path() {
        let config = ClientConfig {
            api_base_url: "https://drive.example.com/api".to_string(),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();
        let request = ApiRequest::get("/api/search").query("keyword", "q3 report");
        let url = transport.resolve(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://drive.example.com/api/api/search?keyword=q3+report"
        );
    }

    #[test]
    fn test_response_helpers() {
        let ok = ApiResponse::new(204, Vec::<u8>::new());
        assert!(ok.is_success());
        assert!(!ok.is_unauthorized());
        assert!(ApiResponse::new(401, Vec::<u8>::new()).is_unauthorized());

        let parsed: serde_json::Value = ApiResponse::new(200, br#"{"a":1}"#.to_vec()).json().unwrap();
        assert_eq!(parsed["a"], 1);
        assert!(ApiResponse::new(200, b"nope".to_vec()).json::<serde_json::Value>().is_err());
    }
}
