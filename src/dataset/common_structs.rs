//! Frequently used structs shared by the endpoints, the ingestion workflow and the exporters

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// Identifier of an asset on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

/// Identifier of a dataset on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AssetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    Accepted,
    Rejected,
    #[serde(other)]
    Other,
}

/// An asset as returned by the dataset service.
///
/// `uuid` is optional on the wire; use [`AssetDescriptor::asset_id`] to read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AssetStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<AssetAnnotation>>,
}

impl AssetDescriptor {
    /// The validated identifier, failing with `MissingIdentifier` when the service omitted it.
    pub fn asset_id(&self) -> Result<AssetId, IngestError> {
        match self.uuid.as_deref() {
            Some(uuid) if !uuid.is_empty() => Ok(AssetId(uuid.to_string())),
            _ => Err(IngestError::MissingIdentifier {
                context: self
                    .external_id
                    .clone()
                    .unwrap_or_else(|| "no external id".to_string()),
            }),
        }
    }

    pub fn annotations(&self) -> &[AssetAnnotation] {
        self.annotations.as_deref().unwrap_or(&[])
    }
}

/// One annotation set attached to an asset (ground truth, auto annotation, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetAnnotation {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Prediction>,
}

/// Prediction-shaped payload, used both for model output and for ground truth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub source_width: f64,
    #[serde(default)]
    pub source_height: f64,
    #[serde(default)]
    pub objects: Vec<PredictedObject>,
}

/// A single detected or labeled object, exactly as it travels on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(
        default,
        deserialize_with = "name_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub class_label: Option<String>,
    #[serde(
        default,
        deserialize_with = "name_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// outline, contours, mask, keyPoints and anything else the service sends
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelRepr {
    Name(String),
    Id(i64),
    Number(f64),
}

// Labels are strings or integer class ids; integers are kept in their decimal form.
fn name_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(
        Option::<LabelRepr>::deserialize(deserializer)?.map(|label| match label {
            LabelRepr::Name(name) => name,
            LabelRepr::Id(id) => id.to_string(),
            LabelRepr::Number(n) => n.to_string(),
        }),
    )
}

/// A Bounding Box in source image pixels, top left corner plus size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A validated labeled object
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub metadata: Map<String, Value>,
}

impl AnnotationRecord {
    pub fn new(label: &str, x: f64, y: f64, width: f64, height: f64) -> AnnotationRecord {
        AnnotationRecord {
            label: label.to_string(),
            confidence: 1.0,
            bbox: BoundingBox {
                x,
                y,
                width,
                height,
            },
            metadata: Map::new(),
        }
    }

    /// Validates a wire object. The error is the reason the object is unusable.
    pub fn from_object(object: &PredictedObject) -> Result<AnnotationRecord, String> {
        let label = object
            .class_label
            .clone()
            .ok_or_else(|| "object has no classLabel".to_string())?;
        let field = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| format!("object labeled {:?} has no {}", label, name))
        };
        let bbox = BoundingBox {
            x: field(object.x, "x")?,
            y: field(object.y, "y")?,
            width: field(object.width, "width")?,
            height: field(object.height, "height")?,
        };
        // also false for NaN
        if !(bbox.width > 0.0 && bbox.height > 0.0) {
            return Err(format!(
                "object labeled {:?} has an empty box ({} x {})",
                label, bbox.width, bbox.height
            ));
        }
        Ok(AnnotationRecord {
            confidence: object.confidence.unwrap_or(1.0),
            label,
            bbox,
            metadata: object.extra.clone(),
        })
    }

    /// The wire form submitted as ground truth, `category` mirrors the label.
    pub fn to_object(&self, id: u64) -> PredictedObject {
        PredictedObject {
            id: Some(id),
            confidence: Some(self.confidence),
            class_label: Some(self.label.clone()),
            category: Some(self.label.clone()),
            x: Some(self.bbox.x),
            y: Some(self.bbox.y),
            width: Some(self.bbox.width),
            height: Some(self.bbox.height),
            extra: self.metadata.clone(),
        }
    }
}
