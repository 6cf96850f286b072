use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use surf::http::Mime;

use super::{read_json, EndpointConfig};
use crate::dataset::common_structs::{AssetDescriptor, AssetId, DatasetId, Prediction};
use crate::dataset::DataService;
use crate::error::RemoteError;

#[derive(Debug, Serialize)]
struct AssetQuery<'a> {
    account_uuid: &'a str,
    dataset_uuid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_annotations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dataset_version: Option<&'a str>,
}

/// Dataset API over HTTPS
pub struct HttpDataEndpoint {
    client: surf::Client,
    config: EndpointConfig,
    account_id: String,
}

impl HttpDataEndpoint {
    pub fn new(config: EndpointConfig, account_id: &str) -> HttpDataEndpoint {
        HttpDataEndpoint {
            client: surf::Client::new(),
            config,
            account_id: account_id.to_string(),
        }
    }

    fn query<'a>(&'a self, dataset_id: &'a DatasetId) -> AssetQuery<'a> {
        AssetQuery {
            account_uuid: &self.account_id,
            dataset_uuid: dataset_id.as_str(),
            external_id: None,
            include_annotations: None,
            dataset_version: None,
        }
    }
}

fn bad_request(e: surf::Error) -> RemoteError {
    RemoteError::Rejected {
        status: 400,
        message: e.to_string(),
    }
}

#[async_trait]
impl DataService for HttpDataEndpoint {
    async fn upload_asset(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        dataset_id: &DatasetId,
        external_id: &str,
    ) -> Result<AssetDescriptor, RemoteError> {
        let mime = Mime::from_str(mime_type).map_err(bad_request)?;
        let query = AssetQuery {
            external_id: Some(external_id),
            ..self.query(dataset_id)
        };
        debug!("POST assets for {} ({} bytes)", external_id, bytes.len());
        let request = self
            .client
            .post(self.config.url("assets"))
            .query(&query)
            .map_err(bad_request)?
            .body_bytes(bytes)
            .content_type(mime);
        let response = self.config.send(request).await?;
        read_json(response).await
    }

    async fn get_asset(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<AssetDescriptor, RemoteError> {
        let query = AssetQuery {
            include_annotations: Some(include_annotations),
            ..self.query(dataset_id)
        };
        let request = self
            .client
            .get(self.config.url(&format!("assets/{}", asset_id)))
            .query(&query)
            .map_err(bad_request)?;
        let response = self.config.send(request).await?;
        read_json(response).await
    }

    async fn update_ground_truth(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        ground_truth: &Prediction,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .patch(self.config.url(&format!("assets/{}/ground_truth", asset_id)))
            .query(&self.query(dataset_id))
            .map_err(bad_request)?
            .body_json(ground_truth)
            .map_err(bad_request)?;
        self.config.send(request).await?;
        Ok(())
    }

    async fn list_assets(
        &self,
        dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<Vec<AssetDescriptor>, RemoteError> {
        let query = AssetQuery {
            include_annotations: Some(include_annotations),
            ..self.query(dataset_id)
        };
        let request = self
            .client
            .get(self.config.url("assets"))
            .query(&query)
            .map_err(bad_request)?;
        let response = self.config.send(request).await?;
        read_json(response).await
    }

    async fn download_asset(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        dataset_version: Option<&str>,
    ) -> Result<Vec<u8>, RemoteError> {
        let query = AssetQuery {
            dataset_version,
            ..self.query(dataset_id)
        };
        let request = self
            .client
            .get(self.config.url(&format!("assets/{}/image", asset_id)))
            .query(&query)
            .map_err(bad_request)?;
        let mut response = self.config.send(request).await?;
        response
            .body_bytes()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))
    }
}
