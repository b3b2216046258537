//! Request plumbing shared by the storage and processing clients.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::contract::ApiError;

pub fn authorized(builder: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    builder.header(AUTHORIZATION, credentials.header_value())
}

/// Sends the request and fails on transport errors or non-2xx statuses.
pub async fn send(url: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
    let response = builder.send().await.map_err(|source| {
        warn!(url = %url, error = %source, "Request could not be sent");
        ApiError::Connection {
            url: url.to_string(),
            source,
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!(url = %url, status = %status, "Remote service returned an error status");
        return Err(ApiError::invalid_response(url, format!("HTTP {status}")));
    }
    Ok(response)
}

/// Sends the request and decodes a JSON body.
///
/// Anything other than a 2xx response with an `application/json` content type
/// is reported as [`ApiError::InvalidResponse`].
pub async fn call_json<T: DeserializeOwned>(
    url: &str,
    builder: RequestBuilder,
) -> Result<T, ApiError> {
    let response = send(url, builder).await?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.contains("application/json") {
        warn!(url = %url, content_type = %content_type, "Response is not JSON");
        return Err(ApiError::invalid_response(
            url,
            format!("expected JSON, got content type {content_type:?}"),
        ));
    }

    let body = response.json::<T>().await.map_err(|e| {
        warn!(url = %url, error = %e, "Failed to decode JSON response");
        ApiError::invalid_response(url, format!("undecodable JSON body: {e}"))
    })?;
    debug!(url = %url, "Decoded JSON response");
    Ok(body)
}
