mod http_data_endpoint;
mod http_worker_endpoint;

use std::time::Duration;

use async_std::future::timeout;
use surf::{RequestBuilder, Response};

use crate::error::RemoteError;

pub use http_data_endpoint::HttpDataEndpoint;
pub use http_worker_endpoint::HttpWorkerEndpoint;

pub const DEFAULT_DATA_URL: &str = "https://dataset-api.eyepop.ai";
pub const DEFAULT_WORKER_URL: &str = "https://worker-api.eyepop.ai";

/// Where and how to reach one of the hosted endpoints
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl EndpointConfig {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Sends an authenticated request and turns non-success statuses into [`RemoteError`]s.
    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let request = request.header("Authorization", format!("Bearer {}", self.api_key));
        let mut response = match timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(RemoteError::Unavailable(e.to_string())),
            Err(_) => {
                return Err(RemoteError::Unavailable(format!(
                    "no response within {:?}",
                    self.request_timeout
                )))
            }
        };
        if response.status().is_success() {
            return Ok(response);
        }
        let status: u16 = response.status().into();
        let message = response.body_string().await.unwrap_or_default();
        Err(classify_status(status, message))
    }
}

fn classify_status(status: u16, message: String) -> RemoteError {
    match status {
        409 => RemoteError::Conflict(message),
        400..=499 => RemoteError::Rejected { status, message },
        _ => RemoteError::Unavailable(format!("status {}: {}", status, message)),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(mut response: Response) -> Result<T, RemoteError> {
    response
        .body_json::<T>()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}
