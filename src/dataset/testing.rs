//! In-memory services for the workflow tests

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, RgbImage};

use crate::dataset::common_structs::{
    AssetAnnotation, AssetDescriptor, AssetId, AssetStatus, DatasetId, Prediction,
};
use crate::dataset::{DataService, PredictionService};
use crate::error::RemoteError;
use crate::ingestion::Pause;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![];
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

pub fn pending_asset(uuid: &str) -> AssetDescriptor {
    AssetDescriptor {
        uuid: Some(uuid.to_string()),
        status: Some(AssetStatus::Pending),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeDataService {
    /// Answers to successive uploads
    pub uploads: Mutex<VecDeque<Result<AssetDescriptor, RemoteError>>>,
    /// Answers to successive status checks, `pending` once exhausted
    pub statuses: Mutex<VecDeque<AssetStatus>>,
    pub ground_truth_error: Mutex<Option<RemoteError>>,
    pub list_response: Mutex<Option<Result<Vec<AssetDescriptor>, RemoteError>>>,
    pub downloads: HashMap<String, Result<Vec<u8>, RemoteError>>,
    pub calls: Mutex<Vec<String>>,
    pub ground_truths: Mutex<Vec<(AssetId, Prediction)>>,
}

impl FakeDataService {
    pub fn accepting_after(pending: usize, uuid: &str) -> FakeDataService {
        let mut statuses: VecDeque<_> = std::iter::repeat(AssetStatus::Pending).take(pending).collect();
        statuses.push_back(AssetStatus::Accepted);
        FakeDataService {
            uploads: Mutex::new(VecDeque::from(vec![Ok(pending_asset(uuid))])),
            statuses: Mutex::new(statuses),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DataService for FakeDataService {
    async fn upload_asset(
        &self,
        _bytes: Vec<u8>,
        mime_type: &str,
        _dataset_id: &DatasetId,
        external_id: &str,
    ) -> Result<AssetDescriptor, RemoteError> {
        self.record(format!("upload {} {}", external_id, mime_type));
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Unavailable("no upload scripted".to_string())))
    }

    async fn get_asset(
        &self,
        asset_id: &AssetId,
        _dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<AssetDescriptor, RemoteError> {
        self.record(format!("get {} {}", asset_id, include_annotations));
        let annotations = if include_annotations {
            let ground_truths = self.ground_truths.lock().unwrap();
            Some(
                ground_truths
                    .iter()
                    .filter(|(id, _)| id == asset_id)
                    .map(|(_, prediction)| AssetAnnotation {
                        kind: Some("ground_truth".to_string()),
                        user_review: None,
                        annotation: Some(prediction.clone()),
                    })
                    .collect(),
            )
        } else {
            None
        };
        let status = if include_annotations {
            AssetStatus::Accepted
        } else {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(AssetStatus::Pending)
        };
        Ok(AssetDescriptor {
            uuid: Some(asset_id.to_string()),
            status: Some(status),
            annotations,
            ..Default::default()
        })
    }

    async fn update_ground_truth(
        &self,
        asset_id: &AssetId,
        _dataset_id: &DatasetId,
        ground_truth: &Prediction,
    ) -> Result<(), RemoteError> {
        self.record(format!("ground_truth {}", asset_id));
        if let Some(e) = self.ground_truth_error.lock().unwrap().take() {
            return Err(e);
        }
        self.ground_truths
            .lock()
            .unwrap()
            .push((asset_id.clone(), ground_truth.clone()));
        Ok(())
    }

    async fn list_assets(
        &self,
        _dataset_id: &DatasetId,
        include_annotations: bool,
    ) -> Result<Vec<AssetDescriptor>, RemoteError> {
        self.record(format!("list {}", include_annotations));
        self.list_response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(vec![]))
    }

    async fn download_asset(
        &self,
        asset_id: &AssetId,
        _dataset_id: &DatasetId,
        dataset_version: Option<&str>,
    ) -> Result<Vec<u8>, RemoteError> {
        self.record(format!("download {} {:?}", asset_id, dataset_version));
        self.downloads
            .get(asset_id.as_str())
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::Unavailable("unknown asset".to_string())))
    }
}

/// Answers predictions keyed by the submitted image bytes
#[derive(Default)]
pub struct FakePredictionService {
    pub predictions: HashMap<Vec<u8>, Prediction>,
    pub calls: Mutex<usize>,
}

#[async_trait]
impl PredictionService for FakePredictionService {
    async fn predict(&self, bytes: Vec<u8>, _mime_type: &str) -> Result<Prediction, RemoteError> {
        *self.calls.lock().unwrap() += 1;
        self.predictions
            .get(&bytes)
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable("no prediction scripted".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingPause {
    pub pauses: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Pause for RecordingPause {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}
