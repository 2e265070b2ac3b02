//! HTTP transport for finished artifacts.
//!
//! One request per upload. Progress is reported as reqwest pulls body chunks,
//! so it tracks bytes handed to the connection rather than bytes acknowledged
//! by the server.

use crate::{
    imaging::OutputArtifact,
    models::{
        session::{LoginRequest, LoginResponse, SESSION_HEADER},
        upload::{AVATAR_FIELD, ErrorBody, UploadResponse},
    },
};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Filename sent with every artifact; the server derives its own name.
pub const AVATAR_FILENAME: &str = "avatar.jpg";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body chunk size, which is also the progress granularity.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Errors from the upload transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request itself failed (connect, DNS, TLS, reset).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        /// Machine-readable code, when the body carried one.
        code: Option<String>,
        message: String,
    },

    #[error("request timed out")]
    TimedOut,

    #[error("upload cancelled")]
    Cancelled,
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::TimedOut
        } else {
            TransportError::Request(err)
        }
    }
}

/// Bytes handed to the connection so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.sent as f64 / self.total as f64
        }
    }
}

/// A 2xx answer. The body is parsed best-effort; a success without a
/// readable body is still a success.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub status: u16,
    pub response: Option<UploadResponse>,
}

impl UploadReceipt {
    pub fn temp_url(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.temp_url.as_str())
    }
}

/// Client for one avatar server.
#[derive(Debug, Clone)]
pub struct UploadClient {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
}

impl UploadClient {
    /// * `base_url` - e.g. `http://localhost:4000`, without a trailing slash.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`]; its timeout applies.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Exchange credentials for a session token.
    pub async fn login(&self, username: &str, password: &str) -> TransportResult<LoginResponse> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(TransportError::from_request)?;

        let response = Self::ensure_success(response).await?;
        response.json().await.map_err(TransportError::from_request)
    }

    /// Send `artifact` as the `avatar` field of a multipart POST to `/upload`.
    ///
    /// `on_progress` runs on the task driving the request each time a chunk is
    /// taken. Cancelling `cancel` drops the request; the artifact is borrowed
    /// and stays with the caller either way.
    pub async fn upload<F>(
        &self,
        token: &str,
        artifact: &OutputArtifact,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> TransportResult<UploadReceipt>
    where
        F: FnMut(UploadProgress) + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let form = self.form(artifact, on_progress)?;
        let request = async {
            let response = self
                .client
                .post(format!("{}/upload", self.base_url))
                .header(SESSION_HEADER, token)
                .multipart(form)
                .send()
                .await
                .map_err(TransportError::from_request)?;

            let response = Self::ensure_success(response).await?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(TransportError::from_request)?;
            let parsed = serde_json::from_slice::<UploadResponse>(&body).ok();
            if parsed.is_none() {
                tracing::debug!(status, "upload succeeded without a readable body");
            }
            Ok::<_, TransportError>(UploadReceipt {
                status,
                response: parsed,
            })
        };

        // Cancellation wins over a response that completes in the same poll.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("upload cancelled by caller");
                Err(TransportError::Cancelled)
            }
            result = request => result,
        }
    }

    // ---- private helpers ----

    fn form<F>(&self, artifact: &OutputArtifact, mut on_progress: F) -> TransportResult<Form>
    where
        F: FnMut(UploadProgress) + Send + 'static,
    {
        let bytes = artifact.bytes.clone();
        let total = bytes.len() as u64;
        let chunks: Vec<Bytes> = (0..bytes.len())
            .step_by(self.chunk_size)
            .map(|start| bytes.slice(start..(start + self.chunk_size).min(bytes.len())))
            .collect();

        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            on_progress(UploadProgress { sent, total });
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(AVATAR_FILENAME)
            .mime_str(OutputArtifact::MIME)?;
        Ok(Form::new().part(AVATAR_FIELD, part))
    }

    /// Turn a non-2xx response into [`TransportError::Rejected`], reading the
    /// `{code, message}` body when there is one.
    async fn ensure_success(response: reqwest::Response) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let (code, message) = match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => (Some(err.code), err.message),
            Err(_) => {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                let message = if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                };
                (None, message)
            }
        };
        tracing::warn!(status = status.as_u16(), code = ?code, "request rejected: {}", message);
        Err(TransportError::Rejected {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        imaging::compress::encode,
        services::session_store::SessionStore,
        test_helpers::{TestApp, noisy_rgb},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };
    use tokio::net::TcpListener;

    async fn serve(app: &TestApp) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn artifact() -> OutputArtifact {
        encode(&noisy_rgb(64, 64), 0.7).unwrap()
    }

    #[test]
    fn progress_fraction() {
        assert_eq!(UploadProgress { sent: 0, total: 0 }.fraction(), 1.0);
        assert_eq!(UploadProgress { sent: 25, total: 100 }.fraction(), 0.25);
    }

    #[tokio::test]
    async fn uploads_artifact_and_reports_progress() {
        let app = TestApp::new().await;
        let base = serve(&app).await;
        let client = UploadClient::new(&base, DEFAULT_TIMEOUT)
            .unwrap()
            .with_chunk_size(1024);

        let login = client.login("admin", "password").await.unwrap();
        let artifact = artifact();

        let sent = Arc::new(AtomicU64::new(0));
        let seen = sent.clone();
        let receipt = client
            .upload(
                &login.session_token,
                &artifact,
                move |p| seen.store(p.sent, Ordering::SeqCst),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.status, 200);
        assert_eq!(sent.load(Ordering::SeqCst), artifact.len() as u64);
        let temp_url = receipt.temp_url().unwrap().to_string();
        assert!(temp_url.starts_with("/uploads/"));
        assert!(temp_url.ends_with("_avatar.jpg"));
        let session = app.sessions.get(&login.session_token).unwrap();
        assert_eq!(session.avatar_path, temp_url);
    }

    #[tokio::test]
    async fn rejection_carries_server_code() {
        let app = TestApp::new().await;
        let base = serve(&app).await;
        let client = UploadClient::new(&base, DEFAULT_TIMEOUT).unwrap();

        let err = client
            .upload("stale-token", &artifact(), |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            TransportError::Rejected { status, code, .. } => {
                assert_eq!(status, 401);
                assert_eq!(code.as_deref(), Some("INVALID_SESSION"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(app.stored_files().is_empty());
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let app = TestApp::new().await;
        let base = serve(&app).await;
        let client = UploadClient::new(&base, DEFAULT_TIMEOUT).unwrap();
        let err = client.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_sends_nothing() {
        let app = TestApp::new().await;
        let base = serve(&app).await;
        let client = UploadClient::new(&base, DEFAULT_TIMEOUT).unwrap();
        let token = app.login();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.upload(&token, &artifact(), |_| {}, &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(app.stored_files().is_empty());
        assert_eq!(
            app.sessions.get(&token).unwrap().avatar_path,
            "/uploads/default-avatar.png"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UploadClient::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        let err = client
            .upload("t", &artifact(), |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Request(_) | TransportError::TimedOut
        ));
    }

    #[tokio::test]
    async fn cancelling_mid_upload_keeps_the_artifact() {
        let app = TestApp::new().await;
        let base = serve(&app).await;
        let client = UploadClient::new(&base, DEFAULT_TIMEOUT)
            .unwrap()
            .with_chunk_size(256);
        let token = app.login();
        let artifact = artifact();
        let before = artifact.clone();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        let err = client
            .upload(
                &token,
                &artifact,
                move |p| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if p.sent > 0 {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert!(artifact.len() > 256);
        assert_eq!(artifact, before);
    }
}
