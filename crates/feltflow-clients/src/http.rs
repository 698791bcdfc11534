//! Request plumbing shared by every client.

use feltflow_abstraction::{ClientError, ClientResult};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::error;

/// Sends a request, mapping transport failures to `RequestError`.
pub(crate) async fn send(request: RequestBuilder, what: &str) -> ClientResult<Response> {
    request.send().await.map_err(|e| {
        error!(error = %e, request = what, "Request failed");
        if e.is_connect() {
            ClientError::RequestError(format!("{what}: service not reachable: {e}"))
        } else {
            ClientError::RequestError(format!("{what}: {e}"))
        }
    })
}

/// Fails with `ResponseError` (or `NotFound` for 404) unless the status is a success.
pub(crate) async fn check_status(response: Response, what: &str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    error!(status = %status, body = %body, request = what, "Service returned error status");
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(format!("{what}: {body}")));
    }
    Err(ClientError::ResponseError { status: status.as_u16(), body })
}

/// Decodes a JSON body, keeping the raw text in the error.
pub(crate) async fn json<T: DeserializeOwned>(response: Response, what: &str) -> ClientResult<T> {
    let text = response
        .text()
        .await
        .map_err(|e| ClientError::RequestError(format!("{what}: failed to read body: {e}")))?;
    serde_json::from_str(&text).map_err(|e| {
        error!(error = %e, body = %text, request = what, "Failed to parse response");
        ClientError::SerializationError(format!("{what}: {e}"))
    })
}

/// Sends, checks and decodes in one go.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> ClientResult<T> {
    let response = check_status(send(request, what).await?, what).await?;
    json(response, what).await
}

/// Strips a trailing slash so paths can be appended with `format!`.
pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
