//! HTTP API client: file upload, account registration/login, user list.
//!
//! The base URL is derived from the endpoint on every request, so a settings
//! change only needs [`ApiClient::set_endpoint`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConnectionEndpoint;
use crate::error::ApiError;

/// Result of a successful upload, ready to be sent as a `file` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub filename: String,
}

/// A logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    success: bool,
    token: Option<String>,
    username: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct UsersResponse {
    success: bool,
    #[serde(default)]
    users: Vec<User>,
}

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: ConnectionEndpoint,
}

impl ApiClient {
    pub fn new(endpoint: ConnectionEndpoint) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, endpoint })
    }

    pub fn set_endpoint(&mut self, endpoint: ConnectionEndpoint) {
        self.endpoint = endpoint;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.http_base())
    }

    /// Upload a file from disk.
    pub async fn upload(&self, path: &Path) -> Result<UploadedFile, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::File {
            path: path.display().to_string(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        self.upload_bytes(&filename, bytes).await
    }

    /// Multipart POST to `/upload` with the content in part `file`.
    pub async fn upload_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadedFile, ApiError> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self.http.post(self.url("upload")).multipart(form).send().await?;
        let resp = check_status(resp).await?;
        let uploaded: UploadedFile = resp
            .json()
            .await
            .map_err(|e| ApiError::Body(e.to_string()))?;
        tracing::info!(filename, size, url = %uploaded.url, "Uploaded file");
        Ok(uploaded)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.auth("register", username, password).await?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, ApiError> {
        let body = self.auth("login", username, password).await?;
        match (body.token, body.username) {
            (Some(token), Some(username)) => Ok(AuthSession { username, token }),
            _ => Err(ApiError::Body("login response missing token or username".into())),
        }
    }

    async fn auth(&self, path: &str, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&AuthRequest { username, password })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: AuthResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Body(e.to_string()))?;
        if !body.success {
            return Err(ApiError::Rejected(
                body.message.unwrap_or_else(|| "Request failed.".to_string()),
            ));
        }
        Ok(body)
    }

    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        let resp = self.http.get(self.url("users")).send().await?;
        let resp = check_status(resp).await?;
        let body: UsersResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Body(e.to_string()))?;
        if !body.success {
            return Err(ApiError::Rejected("user list unavailable".into()));
        }
        Ok(body.users)
    }
}

/// Turn a non-2xx response into [`ApiError::Status`], preferring the
/// server's `message` field when the body is JSON.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let body = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);
    Err(ApiError::Status { status, body })
}
