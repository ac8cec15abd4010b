use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::auth::types::{
    RefreshRequest, RefreshResponse, RegistrationForm, TokenPair, TokenRequest, UserProfile,
    ValidateRequest, ValidateResponse,
};
use crate::error::BackendError;

/// Password login
pub const TOKEN_PATH: &str = "/api/token/";
/// Access token refresh
pub const REFRESH_PATH: &str = "/api/token/refresh/";
/// Current user profile
pub const PROFILE_PATH: &str = "/api/auth/user/";
/// Federated token validation (some deployments spell it `validate-token/`)
pub const DEFAULT_VALIDATE_PATH: &str = "/api/google/validate_token/";
/// Account registration
pub const DEFAULT_REGISTER_PATH: &str = "/api/user/register/";

/// HTTP client for the storefront backend
pub struct BackendClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash
    base_url: String,

    validate_path: String,
    register_path: String,

    /// Bearer token attached to every request built through `request`
    default_bearer: RwLock<Option<String>>,
}

impl BackendClient {
    /// Create a new backend client
    pub fn new(base_url: &str, connect_timeout: u64, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            validate_path: DEFAULT_VALIDATE_PATH.to_string(),
            register_path: DEFAULT_REGISTER_PATH.to_string(),
            default_bearer: RwLock::new(None),
        })
    }

    pub fn with_validate_path(mut self, path: impl Into<String>) -> Self {
        self.validate_path = path.into();
        self
    }

    pub fn with_register_path(mut self, path: impl Into<String>) -> Self {
        self.register_path = path.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Replace (or clear) the default `Authorization: Bearer` header
    pub fn set_default_bearer(&self, token: Option<String>) {
        let mut bearer = self
            .default_bearer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *bearer = token;
    }

    pub fn default_bearer(&self) -> Option<String> {
        self.default_bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a request to any backend path with the default bearer header applied
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.default_bearer() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POST `{username, password}` and receive an access/refresh pair
    pub async fn obtain_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPair, BackendError> {
        let request = self
            .client
            .post(self.url(TOKEN_PATH))
            .json(&TokenRequest { username, password });
        self.send_json(request).await
    }

    /// POST `{refresh}` and receive a new access token
    pub async fn refresh_access(&self, refresh: &str) -> Result<RefreshResponse, BackendError> {
        let request = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh });
        self.send_json(request).await
    }

    /// GET the profile of whoever `bearer` belongs to
    pub async fn fetch_profile(&self, bearer: &str) -> Result<UserProfile, BackendError> {
        let request = self.client.get(self.url(PROFILE_PATH)).bearer_auth(bearer);
        self.send_json(request).await
    }

    /// Ask the backend whether a federated token is still good
    pub async fn validate_federated(&self, token: &str) -> Result<bool, BackendError> {
        let request = self
            .client
            .post(self.url(&self.validate_path))
            .json(&ValidateRequest {
                access_token: token,
            });
        let body: ValidateResponse = self.send_json(request).await?;
        Ok(body.valid)
    }

    /// Create an account; the body of a successful response is ignored
    pub async fn register(&self, form: &RegistrationForm) -> Result<(), BackendError> {
        let request = self.client.post(self.url(&self.register_path)).json(form);
        self.send(request).await.map(|_| ())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse backend response");
            BackendError::Decode(e.to_string())
        })
    }

    /// Execute a request, mapping transport failures and error statuses
    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let request = request.build().map_err(|e| BackendError::from_transport(&e))?;
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(method = %method, url = %url, "Sending backend request");

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let err = BackendError::from_transport(&e);
                tracing::warn!(
                    error = %err,
                    method = %method,
                    url = %url,
                    "Backend request failed"
                );
                return Err(err);
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = %status, "Backend request successful");
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            method = %method,
            url = %url,
            response_body = %error_text,
            "Backend returned error response"
        );

        Err(BackendError::Status {
            status: status.as_u16(),
            message: error_text,
        })
    }
}
