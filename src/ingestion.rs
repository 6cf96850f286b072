//! Asset ingestion: upload, wait for acceptance, attach ground truth.

mod acceptance_poller;
mod ground_truth;
mod manifest;
mod upload;

use std::time::Duration;

use log::{info, warn};

pub use acceptance_poller::{AcceptancePoller, AsyncStdPause, Pause};
pub use ground_truth::{attach_ground_truth, build_ground_truth, load_records};
pub use manifest::{prepare_manifest, PreparedManifest};
pub use upload::{upload_image, ImageSource};

use crate::dataset::common_structs::{AnnotationRecord, AssetDescriptor, DatasetId};
use crate::dataset::DataService;
use crate::error::IngestError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// An image with the labels to attach once it is accepted
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub image: ImageSource,
    pub external_id: String,
    pub records: Vec<AnnotationRecord>,
}

/// Outcome of a batch, one entry per item
#[derive(Debug, Default)]
pub struct IngestReport {
    pub ingested: Vec<AssetDescriptor>,
    /// External id and error of every item that did not make it
    pub failures: Vec<(String, IngestError)>,
}

/// Runs the whole upload → accept → label sequence for one image
pub struct AssetIngestor<'a, S: ?Sized, P = AsyncStdPause> {
    service: &'a S,
    dataset_id: DatasetId,
    poller: AcceptancePoller<P>,
    upload_timeout: Duration,
}

impl<'a, S: DataService + Sync + ?Sized> AssetIngestor<'a, S, AsyncStdPause> {
    pub fn new(service: &'a S, dataset_id: DatasetId) -> Self {
        AssetIngestor {
            service,
            dataset_id,
            poller: AcceptancePoller::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLL_ATTEMPTS),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl<'a, S: DataService + Sync + ?Sized, P: Pause + Sync> AssetIngestor<'a, S, P> {
    pub fn with_poller<Q: Pause>(self, poller: AcceptancePoller<Q>) -> AssetIngestor<'a, S, Q> {
        AssetIngestor {
            service: self.service,
            dataset_id: self.dataset_id,
            poller,
            upload_timeout: self.upload_timeout,
        }
    }

    pub fn with_upload_timeout(mut self, upload_timeout: Duration) -> Self {
        self.upload_timeout = upload_timeout;
        self
    }

    /// Uploads `image`, waits until the service accepts it and stores `records` as its ground
    /// truth. Returns the asset as the service reports it afterwards, annotations included.
    pub async fn ingest(
        &self,
        image: &ImageSource,
        external_id: &str,
        records: &[AnnotationRecord],
    ) -> Result<AssetDescriptor, IngestError> {
        info!("Uploading {} to dataset {}", external_id, self.dataset_id);
        let asset_id = upload_image(
            self.service,
            image,
            &self.dataset_id,
            external_id,
            self.upload_timeout,
        )
        .await?;
        info!("Asset uploaded, id {}", asset_id);

        self.poller
            .wait_until_accepted(self.service, &asset_id, &self.dataset_id)
            .await?;
        info!("Asset {} accepted", asset_id);

        attach_ground_truth(
            self.service,
            &asset_id,
            &self.dataset_id,
            image.width,
            image.height,
            records,
        )
        .await?;
        info!("Ground truth with {} objects added to {}", records.len(), asset_id);

        self.service
            .get_asset(&asset_id, &self.dataset_id, true)
            .await
            .map_err(|e| IngestError::remote(asset_id.to_string(), e))
    }

    /// Ingests items one after the other. A failing item is logged and reported, the following
    /// ones are still ingested.
    pub async fn ingest_all(&self, items: &[IngestItem]) -> IngestReport {
        let mut report = IngestReport::default();
        for (n, item) in items.iter().enumerate() {
            info!("Ingesting {} ({}/{})", item.external_id, n + 1, items.len());
            match self.ingest(&item.image, &item.external_id, &item.records).await {
                Ok(asset) => report.ingested.push(asset),
                Err(e) => {
                    warn!("Could not ingest {}: {}", item.external_id, e);
                    report.failures.push((item.external_id.clone(), e));
                }
            }
        }
        info!(
            "{} of {} images ingested",
            report.ingested.len(),
            items.len()
        );
        report
    }
}
