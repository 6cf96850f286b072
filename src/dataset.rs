pub mod common_structs;

pub mod data_endpoints;
pub mod data_transformers;
pub mod export;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::dataset::common_structs::{AssetDescriptor, AssetId, DatasetId, Prediction};
use crate::error::RemoteError;

/// The remote dataset service, seen as an opaque collaborator.
///
/// Implementations only translate calls to the wire; workflow context (which asset,
/// what to do on failure) is added by the callers.
#[async_trait]
pub trait DataService {
    /// Submits an image and resolves once the service has created the asset.
    async fn upload_asset(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        dataset_id: &DatasetId,
        external_id: &str,
    ) -> Result<AssetDescriptor, RemoteError>;

    async fn get_asset(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<AssetDescriptor, RemoteError>;

    /// Replaces the ground truth of an asset. Resubmission overwrites.
    async fn update_ground_truth(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        ground_truth: &Prediction,
    ) -> Result<(), RemoteError>;

    async fn list_assets(
        &self,
        dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<Vec<AssetDescriptor>, RemoteError>;

    async fn download_asset(
        &self,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
        dataset_version: Option<&str>,
    ) -> Result<Vec<u8>, RemoteError>;
}

/// Runs the hosted model on a single image.
#[async_trait]
pub trait PredictionService {
    async fn predict(&self, bytes: Vec<u8>, mime_type: &str) -> Result<Prediction, RemoteError>;
}
