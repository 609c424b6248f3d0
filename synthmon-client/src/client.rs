//! Core client implementation.

use crate::error::{ClientError, Result};
use crate::types::{Check, Probe};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Client-level timeout applied to every request as a backstop. Callers that
/// need tighter bounds wrap individual calls in their own timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for the synthetic-monitoring management API.
///
/// All requests carry the tenant's API token in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct Client {
    /// Base URL of the API server.
    base_url: String,
    /// HTTP client.
    http: HttpClient,
    /// Tenant API token.
    token: String,
}

impl Client {
    /// Create a new client for the given API server.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s) or the HTTP client cannot
    /// be constructed.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let http = HttpClient::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            http,
            token: token.into(),
        })
    }

    /// List all probes visible to the tenant.
    pub async fn list_probes(&self) -> Result<Vec<Probe>> {
        let response = self.get("probe/list").await?;
        self.handle_response(response).await
    }

    /// List all checks owned by the tenant.
    pub async fn list_checks(&self) -> Result<Vec<Check>> {
        let response = self.get("check/list").await?;
        self.handle_response(response).await
    }

    /// Create a new check. Returns the stored check, including its assigned ID.
    pub async fn add_check(&self, check: &Check) -> Result<Check> {
        let response = self.post("check/add", check).await?;
        self.handle_response(response).await
    }

    /// Update an existing check (matched by its ID).
    pub async fn update_check(&self, check: &Check) -> Result<Check> {
        let response = self.post("check/update", check).await?;
        self.handle_response(response).await
    }

    /// Delete a check by ID.
    pub async fn delete_check(&self, id: i64) -> Result<()> {
        let url = self.url(&format!("check/delete/{}", id));
        let response = self.with_auth(self.http.delete(&url)).send().await?;
        self.handle_empty_response(response).await
    }

    /// Build a full URL from a path.
    fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/api/v1/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Add the authorization header to a request.
    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        let request = self.with_auth(self.http.get(&url));
        request.send().await.map_err(ClientError::Http)
    }

    async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = self.url(path);
        let request = self.with_auth(self.http.post(&url)).json(body);
        request.send().await.map_err(ClientError::Http)
    }

    /// Handle a response and deserialize the JSON body.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response.json::<T>().await.map_err(ClientError::Http)
        } else {
            Err(self.api_error(status.as_u16(), response).await)
        }
    }

    /// Handle a response that carries no interesting body.
    async fn handle_empty_response(&self, response: Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(self.api_error(status.as_u16(), response).await)
        }
    }

    /// Extract an error message from a failed response. The API reports
    /// failures as `{"code": .., "err": .., "msg": ..}`.
    async fn api_error(&self, status: u16, response: Response) -> ClientError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => json["msg"]
                .as_str()
                .or_else(|| json["err"].as_str())
                .or_else(|| json["error"].as_str())
                .unwrap_or(&body)
                .to_string(),
            Err(_) => body,
        };

        ClientError::Api { status, message }
    }
}
