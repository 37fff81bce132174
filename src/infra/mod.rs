pub mod confluence;
pub mod git;
pub mod github;
pub mod jira;
pub mod llm;
pub mod references;

use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};

use crate::domain::context::truncate_chars;
use crate::error::{AppError, AppResult};

const USER_AGENT: &str = concat!("ticketpr/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_CHARS: usize = 200;

/// Builds a client whose every request is bounded by `timeout`.
pub(crate) fn http_client(timeout: Duration, headers: HeaderMap) -> AppResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| AppError::Configuration(format!("failed to build HTTP client: {err}")))
}

pub(crate) fn basic_auth(email: &str, token: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{email}:{token}")))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Timeouts and connection failures are transient; anything else is
/// reported through `permanent`.
pub(crate) fn transport_error(
    service: &'static str,
    err: reqwest::Error,
    permanent: fn(String) -> AppError,
) -> AppError {
    let transient = err.is_timeout() || err.is_connect() || err.is_request();
    let message = err.without_url().to_string();
    if transient {
        AppError::TransientRemote { service, message }
    } else {
        permanent(format!("{service} request failed: {message}"))
    }
}

/// Passes successful responses through and classifies the rest.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: Response,
    permanent: fn(String) -> AppError,
) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read response>".to_string());
    let message = format!(
        "{service} responded with {status}: {}",
        truncate_chars(body.trim(), ERROR_BODY_CHARS)
    );
    if is_retryable_status(status) {
        Err(AppError::TransientRemote { service, message })
    } else {
        Err(permanent(message))
    }
}
