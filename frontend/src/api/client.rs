use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    api::types::{ApiError, ErrorBody},
    config,
};

#[cfg(all(test, not(target_arch = "wasm32")))]
use std::{cell::RefCell, sync::Arc};

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Option<String>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: None,
        }
    }

    pub fn new_with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
        }
    }

    pub(crate) async fn resolved_base_url(&self) -> String {
        if let Some(base) = &self.base_url {
            base.clone()
        } else {
            config::await_api_base_url().await
        }
    }

    pub(crate) async fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.resolved_base_url().await, path)
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Sends the request and buffers the body. Transport failures become
    /// `REQUEST_FAILED`; HTTP error statuses are left for the caller.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<ApiResponse, ApiError> {
        let request = builder
            .build()
            .map_err(|e| ApiError::request_failed(format!("Invalid request: {}", e)))?;

        #[cfg(all(test, not(target_arch = "wasm32")))]
        {
            if let Some(responder) = find_mock(request.url().as_str()) {
                // Real transports always suspend; keep that so concurrent
                // callers interleave the same way under test.
                tokio::task::yield_now().await;
                let mock = responder.respond(&request)?;
                return Ok(ApiResponse {
                    status: StatusCode::from_u16(mock.status).unwrap_or(StatusCode::OK),
                    body: mock.body.to_string(),
                });
            }
        }

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let response = self.client.execute(request).await.map_err(|e| {
            log::warn!("{} {} failed: {}", method, path, e);
            ApiError::request_failed("Unable to reach the server")
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::request_failed(format!("Failed to read response: {}", e)))?;
        Ok(ApiResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Parses a success body. A body that does not match `T` is a malformed
    /// response, never a partial success.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::malformed(format!("Failed to parse response: {}", e)))
    }

    /// Builds the error for a non-success response, preferring the server's
    /// own message and falling back to `fallback`.
    pub fn error(&self, fallback: &str) -> ApiError {
        let body: ErrorBody = serde_json::from_str(&self.body).unwrap_or_default();
        let code = body.code.clone().unwrap_or_else(|| status_code_name(self.status));
        ApiError {
            error: body.message().unwrap_or_else(|| fallback.to_string()),
            code,
            details: body.details,
        }
    }

    /// `Ok(self)` for 2xx, the parsed error otherwise.
    pub fn error_for_status(self, fallback: &str) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.error(fallback))
        }
    }
}

fn status_code_name(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "UNAUTHORIZED".into(),
        StatusCode::FORBIDDEN => "FORBIDDEN".into(),
        StatusCode::NOT_FOUND => "NOT_FOUND".into(),
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => "VALIDATION_ERROR".into(),
        s if s.is_server_error() => "SERVER_ERROR".into(),
        _ => "UNKNOWN".into(),
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[cfg(all(test, not(target_arch = "wasm32")))]
impl MockResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
pub trait TestResponder {
    fn respond(&self, request: &reqwest::Request) -> Result<MockResponse, ApiError>;
}

#[cfg(all(test, not(target_arch = "wasm32")))]
thread_local! {
    static MOCKS: RefCell<Vec<(String, Arc<dyn TestResponder>)>> = RefCell::new(Vec::new());
}

#[cfg(all(test, not(target_arch = "wasm32")))]
pub fn register_mock(base_url: String, responder: Arc<dyn TestResponder>) {
    MOCKS.with(|mocks| {
        let mut mocks = mocks.borrow_mut();
        mocks.retain(|(base, _)| base != &base_url);
        mocks.push((base_url, responder));
    });
}

#[cfg(all(test, not(target_arch = "wasm32")))]
fn find_mock(url: &str) -> Option<Arc<dyn TestResponder>> {
    MOCKS.with(|mocks| {
        mocks
            .borrow()
            .iter()
            .find(|(base, _)| url.starts_with(base.as_str()))
            .map(|(_, responder)| Arc::clone(responder))
    })
}
