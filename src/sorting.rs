//! Sort a folder of images by whether the model finds a given object in them.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::dataset::common_structs::{PredictedObject, Prediction};
use crate::dataset::PredictionService;
use crate::error::IngestError;
use crate::ingestion::ImageSource;

pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;

/// Target label and the confidence an object must exceed to count
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFilter {
    pub label: String,
    pub min_confidence: f64,
}

impl ObjectFilter {
    /// Objects without a confidence never match.
    pub fn matches(&self, object: &PredictedObject) -> bool {
        object.class_label.as_deref() == Some(self.label.as_str())
            && object.confidence.unwrap_or(0.0) > self.min_confidence
    }

    pub fn filter<'p>(&self, prediction: &'p Prediction) -> Vec<&'p PredictedObject> {
        prediction.objects.iter().filter(|o| self.matches(o)).collect()
    }
}

#[derive(Debug, Default)]
pub struct SortReport {
    pub with_object: Vec<PathBuf>,
    pub without_object: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, IngestError)>,
}

struct OutputDirs {
    json: PathBuf,
    has_object: PathBuf,
    no_object: PathBuf,
}

impl OutputDirs {
    fn create(output_dir: &Path) -> Result<OutputDirs, IngestError> {
        let dirs = OutputDirs {
            json: output_dir.join("json"),
            has_object: output_dir.join("has_object"),
            no_object: output_dir.join("no_object"),
        };
        for dir in [&dirs.json, &dirs.has_object, &dirs.no_object] {
            fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Copies each image of a folder into `has_object/` or `no_object/`.
///
/// Predictions are cached as `json/<file name>.json`, an image with a cached prediction is not
/// sent to the model again.
pub struct ImageSorter<'a, P: ?Sized> {
    service: &'a P,
    filter: ObjectFilter,
}

impl<'a, P: PredictionService + Sync + ?Sized> ImageSorter<'a, P> {
    pub fn new(service: &'a P, filter: ObjectFilter) -> Self {
        ImageSorter { service, filter }
    }

    pub async fn sort(&self, input_dir: &Path, output_dir: &Path) -> Result<SortReport, IngestError> {
        let dirs = OutputDirs::create(output_dir)?;
        let mut images = fs::read_dir(input_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        images.retain(|path| path.is_file() && is_image(path));
        images.sort();

        let mut report = SortReport::default();
        for path in images {
            match self.sort_image(&path, &dirs).await {
                Ok(true) => report.with_object.push(path),
                Ok(false) => report.without_object.push(path),
                Err(e) => {
                    warn!("Could not sort {}: {}", path.display(), e);
                    report.failures.push((path, e));
                }
            }
        }
        info!(
            "{} images with {:?}, {} without",
            report.with_object.len(),
            self.filter.label,
            report.without_object.len()
        );
        Ok(report)
    }

    async fn sort_image(&self, path: &Path, dirs: &OutputDirs) -> Result<bool, IngestError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json_path = dirs.json.join(format!("{}.json", file_name));

        let prediction: Prediction = if json_path.exists() {
            serde_json::from_reader(BufReader::new(File::open(&json_path)?))?
        } else {
            info!("Processing {}", file_name);
            let image = ImageSource::from_path(path)?;
            let prediction = self
                .service
                .predict(image.bytes, image.mime_type)
                .await
                .map_err(|e| IngestError::remote(file_name.clone(), e))?;
            serde_json::to_writer_pretty(BufWriter::new(File::create(&json_path)?), &prediction)?;
            prediction
        };

        let matching = self.filter.filter(&prediction);
        debug!("{}: {} matching objects", file_name, matching.len());
        let has_object = !matching.is_empty();
        let target_dir = if has_object {
            &dirs.has_object
        } else {
            &dirs.no_object
        };
        fs::copy(path, target_dir.join(&file_name))?;
        Ok(has_object)
    }
}
