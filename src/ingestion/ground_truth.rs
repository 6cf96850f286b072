use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::dataset::common_structs::{
    AnnotationRecord, AssetId, DatasetId, PredictedObject, Prediction,
};
use crate::dataset::DataService;
use crate::error::{IngestError, RemoteError};

/// Reads a JSON array of objects (`classLabel`, `x`, `y`, `width`, `height`, optional
/// `confidence`) to be used as ground truth.
pub fn load_records(path: &Path) -> Result<Vec<AnnotationRecord>, IngestError> {
    let file = File::open(path)?;
    let objects: Vec<PredictedObject> = serde_json::from_reader(BufReader::new(file))?;
    objects
        .iter()
        .map(|object| {
            AnnotationRecord::from_object(object).map_err(|reason| {
                IngestError::MalformedAnnotation {
                    asset_id: path.display().to_string(),
                    reason,
                }
            })
        })
        .collect()
}

/// Prediction-shaped ground truth, objects numbered from 1
pub fn build_ground_truth(width: u32, height: u32, records: &[AnnotationRecord]) -> Prediction {
    Prediction {
        source_width: width as f64,
        source_height: height as f64,
        objects: records
            .iter()
            .zip(1..)
            .map(|(record, id)| record.to_object(id))
            .collect(),
    }
}

/// Replaces the ground truth of an accepted asset.
///
/// Resubmitting overwrites the previous labels, but the service may also answer with a
/// conflict, so callers cannot rely on at-most-once delivery.
pub async fn attach_ground_truth<S: DataService + Sync + ?Sized>(
    service: &S,
    asset_id: &AssetId,
    dataset_id: &DatasetId,
    width: u32,
    height: u32,
    records: &[AnnotationRecord],
) -> Result<(), IngestError> {
    let ground_truth = build_ground_truth(width, height, records);
    match service
        .update_ground_truth(asset_id, dataset_id, &ground_truth)
        .await
    {
        Ok(()) => Ok(()),
        Err(RemoteError::Conflict(reason)) => Err(IngestError::Conflict {
            asset_id: asset_id.to_string(),
            reason,
        }),
        Err(RemoteError::Rejected { status, message }) => Err(IngestError::Conflict {
            asset_id: asset_id.to_string(),
            reason: format!("status {}: {}", status, message),
        }),
        Err(e) => Err(IngestError::remote(asset_id.to_string(), e)),
    }
}
