use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use surf::http::Mime;

use super::{read_json, EndpointConfig};
use crate::dataset::common_structs::Prediction;
use crate::dataset::PredictionService;
use crate::error::RemoteError;

/// The worker answers with a single prediction or with one per frame
#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionResponse {
    Frames(Vec<Prediction>),
    Single(Prediction),
}

/// Model inference over HTTPS, against one deployed pop
pub struct HttpWorkerEndpoint {
    client: surf::Client,
    config: EndpointConfig,
    pop_id: String,
}

impl HttpWorkerEndpoint {
    pub fn new(config: EndpointConfig, pop_id: &str) -> HttpWorkerEndpoint {
        HttpWorkerEndpoint {
            client: surf::Client::new(),
            config,
            pop_id: pop_id.to_string(),
        }
    }
}

#[async_trait]
impl PredictionService for HttpWorkerEndpoint {
    async fn predict(&self, bytes: Vec<u8>, mime_type: &str) -> Result<Prediction, RemoteError> {
        let mime = Mime::from_str(mime_type).map_err(|e| RemoteError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        let request = self
            .client
            .post(self.config.url(&format!("pipelines/{}/source", self.pop_id)))
            .body_bytes(bytes)
            .content_type(mime);
        let response = self.config.send(request).await?;
        match read_json::<PredictionResponse>(response).await? {
            PredictionResponse::Single(prediction) => Ok(prediction),
            PredictionResponse::Frames(frames) => Ok(frames.into_iter().next().unwrap_or_default()),
        }
    }
}
