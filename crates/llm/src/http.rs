//! Shared HTTP plumbing: client construction and status-to-error mapping.

use std::time::Duration;

use pipeline::{ProviderError, ProviderName};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Per-request timeout used when the caller does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn client(provider: &ProviderName, timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ProviderError::Configuration {
            provider: provider.clone(),
            message: format!("cannot build HTTP client: {err}"),
        })
}

/// Sends `request` and decodes a 2xx JSON body into `T`.
///
/// | Outcome | Error |
/// |---------|-------|
/// | transport failure, 5xx, 408 | `Unavailable` |
/// | 429 | `RateLimited` (with `Retry-After` seconds when present) |
/// | 401, 403 | `Configuration` |
/// | other 4xx, undecodable body | `InvalidResponse` |
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &ProviderName,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|err| ProviderError::Unavailable {
        provider: provider.clone(),
        message: err.to_string(),
    })?;

    let status = response.status();
    debug!(provider = %provider, status = status.as_u16(), "provider responded");
    if !status.is_success() {
        return Err(status_error(provider, status, response).await);
    }

    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::InvalidResponse {
            provider: provider.clone(),
            message: format!("cannot decode response body: {err}"),
        })
}

async fn status_error(provider: &ProviderName, status: StatusCode, response: Response) -> ProviderError {
    let retry_after = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {}", snippet(&body));
    warn!(provider = %provider, status = status.as_u16(), "provider request failed");

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider: provider.clone(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Configuration {
            provider: provider.clone(),
            message,
        },
        StatusCode::REQUEST_TIMEOUT => ProviderError::Unavailable {
            provider: provider.clone(),
            message,
        },
        s if s.is_server_error() => ProviderError::Unavailable {
            provider: provider.clone(),
            message,
        },
        _ => ProviderError::InvalidResponse {
            provider: provider.clone(),
            message,
        },
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= 200 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(200).collect();
        format!("{cut}...")
    }
}
