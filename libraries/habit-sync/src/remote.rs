//! The remote profile store: `GET /api/profile` and `POST /api/sync`.

use std::time::Duration;

use futures::FutureExt as _;
use futures::future::LocalBoxFuture;
use habit_utils::{Profile, ProfileResponse, SyncRequest, SyncResponse, SyncResponseError};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("Sync rejected: {0}")]
    Rejected(#[from] SyncResponseError),
}

/// Anything that can hold the user's remote profile. Calls carry the bearer credential of the
/// signed-in user.
pub trait RemoteProfileStore {
    fn fetch_profile<'a>(&'a self, token: &'a str)
    -> LocalBoxFuture<'a, Result<Profile, RemoteError>>;

    fn sync<'a>(
        &'a self,
        token: &'a str,
        request: &'a SyncRequest,
    ) -> LocalBoxFuture<'a, Result<SyncResponse, RemoteError>>;
}

/// Talks to the habit backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn hit_server(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&SyncRequest>,
        token: &str,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }
        Ok(response)
    }
}

// The backend explains rejected syncs as `{status: "error", message}`; keep that message.
fn error_from_body(status: u16, body: &str) -> RemoteError {
    serde_json::from_str::<SyncResponse>(body)
        .ok()
        .and_then(|response| response.into_outcome().err())
        .map(RemoteError::Rejected)
        .unwrap_or(RemoteError::Status(status))
}

impl RemoteProfileStore for HttpRemote {
    fn fetch_profile<'a>(
        &'a self,
        token: &'a str,
    ) -> LocalBoxFuture<'a, Result<Profile, RemoteError>> {
        async move {
            let response = self
                .hit_server(reqwest::Method::GET, "/api/profile", None, token)
                .await?;
            let body: ProfileResponse = response.json().await?;
            Ok(body.profile)
        }
        .boxed_local()
    }

    fn sync<'a>(
        &'a self,
        token: &'a str,
        request: &'a SyncRequest,
    ) -> LocalBoxFuture<'a, Result<SyncResponse, RemoteError>> {
        async move {
            let response = self
                .hit_server(reqwest::Method::POST, "/api/sync", Some(request), token)
                .await?;
            Ok(response.json().await?)
        }
        .boxed_local()
    }
}
