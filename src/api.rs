//! Shared HTTP plumbing for the remote backends.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use std::io::{self, Read};
use std::time::Duration;
use url::Url;

use crate::error::{FsError, FsResult};
use crate::fs::Source;

/// An authenticated blocking HTTP client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    token: String,
}

impl ApiClient {
    /// Build a client sending `token` as bearer auth on every request.
    ///
    /// # Errors
    /// Returns an error if the underlying TLS backend cannot be initialised.
    pub fn new(token: &str, timeout: Option<Duration>) -> FsResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("cloudcp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;
        Ok(ApiClient {
            http,
            token: token.to_string(),
        })
    }

    /// Start a request with auth already attached.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// Send a request and turn non-success statuses into [`FsError`].
    ///
    /// # Arguments
    /// * `request` - The prepared request.
    /// * `target` - Human readable resource name used in error messages.
    pub fn send(&self, request: RequestBuilder, target: &str) -> FsResult<Response> {
        let response = request.send()?;
        check_status(response, target)
    }
}

/// Pass successful responses through, map the rest to an error kind.
pub fn check_status(response: Response, target: &str) -> FsResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    tracing::debug!(%status, resource = target, "request failed: {}", body.trim());
    Err(FsError::from_status(status, target, body))
}

/// Body of a download that asked for `Range: bytes={offset}-`.
///
/// A server ignoring the range answers `200` with the whole file; the
/// first `offset` bytes are then discarded here.
pub fn ranged_body(mut response: Response, offset: u64, target: &str) -> FsResult<Source> {
    if offset > 0 && response.status() == StatusCode::OK {
        tracing::debug!(file = target, offset, "range ignored by server, skipping locally");
        let skipped = io::copy(&mut (&mut response).take(offset), &mut io::sink())?;
        if skipped < offset {
            return Err(FsError::InvalidResponse {
                url: target.to_string(),
                message: format!("file is shorter than offset {offset}"),
            });
        }
    }
    Ok(Box::new(response))
}
