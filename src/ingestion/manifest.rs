//! Training manifests: images with polygon outlines, turned into ingestable items.

use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::Path;

use image::ImageOutputFormat;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ImageSource, IngestItem};
use crate::dataset::common_structs::{AnnotationRecord, PredictedObject};
use crate::error::{IngestError, RemoteError};

const CROP_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub data: Vec<ManifestEntry>,
}

/// One labeled drawing, shown in one or more images
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub id: Value,
    /// Overrides the label given on the command line
    #[serde(default)]
    pub label: Option<String>,
    /// Outlines in drawing coordinates
    #[serde(default)]
    pub polygons: Vec<Vec<Point>>,
    #[serde(default)]
    pub images: Vec<ManifestImage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestImage {
    /// Local path, relative to the manifest, or an http(s) URL
    #[serde(default)]
    pub src: Option<String>,
    /// Where the image sits in drawing coordinates
    #[serde(default)]
    pub position: Point,
    #[serde(default)]
    pub crop_box: Option<CropBox>,
}

/// Two opposite corners, in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CropBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl CropBox {
    /// Left, top, width and height, truncated to whole pixels
    fn pixels(&self) -> (u32, u32, u32, u32) {
        (
            self.x1.min(self.x2).floor().max(0.0) as u32,
            self.y1.min(self.y2).floor().max(0.0) as u32,
            (self.x2 - self.x1).abs().floor() as u32,
            (self.y2 - self.y1).abs().floor() as u32,
        )
    }
}

/// Items ready for upload, and the images that could not be prepared
#[derive(Debug, Default)]
pub struct PreparedManifest {
    pub items: Vec<IngestItem>,
    pub skipped: Vec<(String, IngestError)>,
}

impl ManifestEntry {
    fn name(&self) -> String {
        match &self.id {
            Value::String(id) => id.clone(),
            Value::Null => "unnamed entry".to_string(),
            other => other.to_string(),
        }
    }
}

/// Reads a manifest and prepares one item per image.
///
/// Only an unreadable manifest is an error; a missing, unreadable or badly outlined image is
/// reported in `skipped` and the others are still prepared.
pub async fn prepare_manifest(path: &Path, default_label: &str) -> Result<PreparedManifest, IngestError> {
    let manifest: Manifest = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    info!("Manifest {} lists {} entries", path.display(), manifest.data.len());

    let mut prepared = PreparedManifest::default();
    for entry in &manifest.data {
        let label = entry.label.as_deref().unwrap_or(default_label);
        if entry.polygons.is_empty() {
            warn!("No polygons for entry {}, its images get empty ground truth", entry.name());
        }
        for image in &entry.images {
            let name = image.src.clone().unwrap_or_else(|| entry.name());
            match prepare_image(entry, image, label, base_dir).await {
                Ok(item) => prepared.items.push(item),
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    prepared.skipped.push((name, e));
                }
            }
        }
    }
    Ok(prepared)
}

async fn prepare_image(
    entry: &ManifestEntry,
    image: &ManifestImage,
    label: &str,
    base_dir: &Path,
) -> Result<IngestItem, IngestError> {
    let src = image.src.as_deref().ok_or_else(|| IngestError::MalformedAnnotation {
        asset_id: entry.name(),
        reason: "image has no src".to_string(),
    })?;
    let bytes = read_source(src, base_dir).await?;
    let file_name = src.rsplit('/').next().unwrap_or(src).to_string();

    let (source, origin) = match &image.crop_box {
        Some(crop_box) => {
            let (left, top, width, height) = crop_box.pixels();
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.clone());
            let cropped = crop_to_jpeg(&bytes, (left, top, width, height), &file_name)?;
            info!("Cropped {} to ({}, {}, {}, {})", file_name, left, top, width, height);
            (
                ImageSource::from_bytes(cropped, &format!("{}_crop.jpg", stem))?,
                Point {
                    x: image.position.x + left as f64,
                    y: image.position.y + top as f64,
                },
            )
        }
        None => (ImageSource::from_bytes(bytes, &file_name)?, image.position),
    };

    let records = entry
        .polygons
        .iter()
        .map(|polygon| {
            AnnotationRecord::from_object(&polygon_object(polygon, origin, label)).map_err(
                |reason| IngestError::MalformedAnnotation {
                    asset_id: source.file_name.clone(),
                    reason,
                },
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IngestItem {
        external_id: source.file_name.clone(),
        image: source,
        records,
    })
}

async fn read_source(src: &str, base_dir: &Path) -> Result<Vec<u8>, IngestError> {
    if src.starts_with("http://") || src.starts_with("https://") {
        info!("Downloading image from {}", src);
        surf::get(src)
            .recv_bytes()
            .await
            .map_err(|e| IngestError::remote(src, RemoteError::Unavailable(e.to_string())))
    } else {
        Ok(fs::read(base_dir.join(src))?)
    }
}

fn crop_to_jpeg(
    bytes: &[u8],
    (left, top, width, height): (u32, u32, u32, u32),
    file_name: &str,
) -> Result<Vec<u8>, IngestError> {
    if width == 0 || height == 0 {
        return Err(IngestError::Upload {
            external_id: file_name.to_string(),
            reason: "crop box is empty".to_string(),
        });
    }
    let cropped = image::load_from_memory(bytes)?.crop_imm(left, top, width, height);
    let mut encoded = vec![];
    image::DynamicImage::ImageRgb8(cropped.to_rgb8()).write_to(
        &mut Cursor::new(&mut encoded),
        ImageOutputFormat::Jpeg(CROP_JPEG_QUALITY),
    )?;
    Ok(encoded)
}

/// Bounding box of an outline moved into image coordinates, the outline itself kept as key points.
fn polygon_object(polygon: &[Point], origin: Point, label: &str) -> PredictedObject {
    let points: Vec<Point> = polygon
        .iter()
        .map(|p| Point {
            x: p.x - origin.x,
            y: p.y - origin.y,
        })
        .collect();

    let mut object = PredictedObject {
        confidence: Some(1.0),
        class_label: Some(label.to_string()),
        category: Some(label.to_string()),
        ..Default::default()
    };
    if !points.is_empty() {
        let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        object.x = Some(min_x);
        object.y = Some(min_y);
        object.width = Some(max_x - min_x);
        object.height = Some(max_y - min_y);
    }

    let key_points: Vec<Value> = points
        .iter()
        .map(|p| {
            json!({
                "x": p.x,
                "y": p.y,
                "id": 0,
                "confidence": 1.0,
                "visible": true,
                "classLabel": label,
                "category": label,
            })
        })
        .collect();
    let mut extra = Map::new();
    extra.insert(
        "keyPoints".to_string(),
        json!([{
            "category": format!("{}_outline", label),
            "type": "custom-keypoints",
            "points": key_points,
        }]),
    );
    object.extra = extra;
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::png_bytes;

    fn square(x: f64, y: f64, side: f64) -> Vec<Point> {
        vec![
            Point { x, y },
            Point { x: x + side, y },
            Point {
                x: x + side,
                y: y + side,
            },
            Point { x, y: y + side },
        ]
    }

    #[test]
    fn outline_becomes_box_and_key_points() {
        let object = polygon_object(&square(110.0, 220.0, 30.0), Point { x: 100.0, y: 200.0 }, "room");
        let record = AnnotationRecord::from_object(&object).unwrap();
        assert_eq!(record.label, "room");
        assert_eq!(
            (record.bbox.x, record.bbox.y, record.bbox.width, record.bbox.height),
            (10.0, 20.0, 30.0, 30.0)
        );
        let points = &record.metadata["keyPoints"][0]["points"];
        assert_eq!(points.as_array().unwrap().len(), 4);
        assert_eq!(points[2]["x"], 40.0);
        assert_eq!(points[2]["y"], 50.0);
    }

    #[test]
    fn flat_outline_is_rejected() {
        let line = vec![Point { x: 0.0, y: 5.0 }, Point { x: 10.0, y: 5.0 }];
        assert!(AnnotationRecord::from_object(&polygon_object(&line, Point::default(), "room")).is_err());
        assert!(AnnotationRecord::from_object(&polygon_object(&[], Point::default(), "room")).is_err());
    }

    #[test]
    fn crop_box_corners_may_be_given_in_any_order() {
        let crop_box = CropBox {
            x1: 30.7,
            y1: 4.2,
            x2: 10.2,
            y2: 24.9,
        };
        assert_eq!(crop_box.pixels(), (10, 4, 20, 20));
    }

    #[async_std::test]
    async fn prepares_images_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plan.png"), png_bytes(64, 48)).unwrap();
        fs::write(dir.path().join("wide.png"), png_bytes(80, 80)).unwrap();
        let manifest = dir.path().join("manifest.json");
        fs::write(
            &manifest,
            r#"{"data": [
                {"id": 1, "polygons": [[{"x": 5, "y": 5}, {"x": 25, "y": 5}, {"x": 25, "y": 15}]],
                 "images": [{"src": "plan.png", "position": {"x": 0, "y": 0}},
                            {"src": "absent.png"},
                            {"position": {"x": 0, "y": 0}}]},
                {"id": "b", "label": "door", "polygons": [[{"x": 30, "y": 30}, {"x": 40, "y": 38}]],
                 "images": [{"src": "wide.png", "position": {"x": 10, "y": 10},
                             "cropBox": {"x1": 10, "y1": 10, "x2": 50, "y2": 40}}]}
            ]}"#,
        )
        .unwrap();

        let prepared = prepare_manifest(&manifest, "room").await.unwrap();

        assert_eq!(prepared.items.len(), 2);
        let plan = &prepared.items[0];
        assert_eq!(plan.external_id, "plan.png");
        assert_eq!((plan.image.width, plan.image.height), (64, 48));
        assert_eq!(plan.records[0].label, "room");
        assert_eq!(plan.records[0].bbox.width, 20.0);

        let cropped = &prepared.items[1];
        assert_eq!(cropped.external_id, "wide_crop.jpg");
        assert_eq!(cropped.image.mime_type, "image/jpeg");
        assert_eq!((cropped.image.width, cropped.image.height), (40, 30));
        let bbox = cropped.records[0].bbox;
        assert_eq!(cropped.records[0].label, "door");
        assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (10.0, 10.0, 10.0, 8.0));

        let skipped: Vec<_> = prepared.skipped.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(skipped, vec!["absent.png", "1"]);
        assert!(matches!(prepared.skipped[0].1, IngestError::Io(_)));
        assert!(matches!(
            prepared.skipped[1].1,
            IngestError::MalformedAnnotation { .. }
        ));
    }
}
