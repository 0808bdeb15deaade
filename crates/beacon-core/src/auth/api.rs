//! Dashboard auth endpoints.
//!
//! The session manager talks to the API only through [`AuthApi`], so tests can
//! swap in scripted transports without a server.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum AuthApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response carried no token")]
    MissingToken,
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl From<reqwest::Error> for AuthApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Email/password pair posted to the login endpoint.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body returned by login and refresh. Older deployments send `accessToken`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "accessToken")]
    access_token: Option<String>,
}

impl TokenResponse {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            access_token: None,
        }
    }

    /// Picks `token`, falling back to `accessToken`.
    ///
    /// # Errors
    /// Returns `AuthApiError::MissingToken` when neither field is a non-empty string.
    pub fn into_token(self) -> Result<String, AuthApiError> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
            .ok_or(AuthApiError::MissingToken)
    }
}

/// The three session endpoints.
pub trait AuthApi: Send + Sync + 'static {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send;

    /// Exchanges the refresh cookie for a fresh access token.
    fn refresh(&self) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send;

    fn logout(&self) -> impl Future<Output = Result<(), AuthApiError>> + Send;
}

/// [`AuthApi`] over HTTP.
///
/// The client keeps a cookie store so the HttpOnly refresh cookie set by the
/// login response is sent back on refresh and logout.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    http: reqwest::Client,
    login_url: url::Url,
    refresh_url: url::Url,
    logout_url: url::Url,
}

impl HttpAuthApi {
    /// Builds a client for the endpoints in `config`.
    ///
    /// # Errors
    /// Returns an error if an endpoint URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthApiError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Self::with_client(http, config)
    }

    /// Uses a caller-built client (it should have a cookie store).
    ///
    /// # Errors
    /// Returns an error if an endpoint URL is invalid.
    pub fn with_client(http: reqwest::Client, config: &AuthConfig) -> Result<Self, AuthApiError> {
        let endpoint = |path: &str| {
            config
                .endpoint(path)
                .map_err(|e| AuthApiError::Endpoint(format!("{e:#}")))
        };
        Ok(Self {
            login_url: endpoint(&config.login_path)?,
            refresh_url: endpoint(&config.refresh_path)?,
            logout_url: endpoint(&config.logout_path)?,
            http,
        })
    }

    /// The underlying client, sharing the session cookies.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn post_for_token(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<TokenResponse, AuthApiError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthApiError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}

impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, AuthApiError> {
        let request = self.http.post(self.login_url.clone()).json(credentials);
        self.post_for_token(request).await
    }

    async fn refresh(&self) -> Result<TokenResponse, AuthApiError> {
        let request = self.http.post(self.refresh_url.clone());
        self.post_for_token(request).await
    }

    async fn logout(&self) -> Result<(), AuthApiError> {
        let response = self.http.post(self.logout_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AuthApiError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
