//! Job status over the dashboard HTTP API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{JobStatus, PollError};
use crate::config::{AuthConfig, PollerSection};

/// Status payload. Fields beyond `status` and `progress` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobStatus for JobRecord {
    fn status(&self) -> &str {
        &self.status
    }
}

type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// GETs `{base_url}{status_path}` with the current bearer token.
#[derive(Clone)]
pub struct HttpJobStatus {
    http: reqwest::Client,
    auth: AuthConfig,
    poller: PollerSection,
    token: TokenSource,
}

impl std::fmt::Debug for HttpJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJobStatus")
            .field("base_url", &self.auth.base_url)
            .field("status_path", &self.poller.status_path)
            .finish_non_exhaustive()
    }
}

impl HttpJobStatus {
    pub fn new(
        http: reqwest::Client,
        auth: &AuthConfig,
        poller: &PollerSection,
        token: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            http,
            auth: auth.clone(),
            poller: poller.clone(),
            token: Arc::new(token),
        }
    }

    fn url_for(&self, job_id: &str) -> Result<url::Url, PollError> {
        if matches!(job_id, "" | "." | "..") || job_id.contains(['/', '?', '#']) {
            return Err(PollError::Fetch(format!("invalid job id '{job_id}'")));
        }
        let encoded = url::form_urlencoded::byte_serialize(job_id.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        let path = self.poller.status_path_for(&encoded);
        self.auth
            .endpoint(&path)
            .map_err(|e| PollError::Fetch(format!("{e:#}")))
    }

    /// # Errors
    /// Fails without a session token, on transport errors, non-2xx statuses
    /// and bodies that are not a job record.
    pub async fn fetch(&self, job_id: &str) -> Result<JobRecord, PollError> {
        let token = (self.token)().ok_or(PollError::Unauthenticated)?;
        let url = self.url_for(job_id)?;

        let response = self.http.get(url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PollError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}
