use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::dataset::data_endpoints::{EndpointConfig, DEFAULT_DATA_URL, DEFAULT_WORKER_URL};
use crate::dataset::export::ExportSettings;
use crate::ingestion::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_UPLOAD_TIMEOUT};
use crate::sorting::DEFAULT_MIN_CONFIDENCE;

/// Upload labeled images to a hosted vision dataset and export datasets as COCO.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// API secret key
    #[arg(long, env = "EYEPOP_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Seconds to wait for any single request
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload one image, wait until it is accepted and attach its ground truth.
    Ingest {
        /// Account the dataset belongs to
        #[arg(long, env = "EYEPOP_ACCOUNT_ID")]
        account_id: String,

        /// Dataset API base URL
        #[arg(long, env = "EYEPOP_DATA_URL", default_value = DEFAULT_DATA_URL)]
        data_url: String,

        /// Target dataset
        dataset_id: String,

        /// Image to upload
        image: PathBuf,

        /// JSON array of labeled objects (classLabel, x, y, width, height)
        #[arg(long)]
        labels: PathBuf,

        /// External reference name, defaults to the image file name
        #[arg(long)]
        external_id: Option<String>,

        /// Seconds between two status checks
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        poll_interval_secs: u64,

        /// Status checks before giving up
        #[arg(long, default_value_t = DEFAULT_MAX_POLL_ATTEMPTS)]
        max_poll_attempts: u32,

        /// Seconds to wait for the upload to return an asset
        #[arg(long, default_value_t = DEFAULT_UPLOAD_TIMEOUT.as_secs())]
        upload_timeout_secs: u64,
    },
    /// Ingest every image of a training manifest, outlines become ground truth boxes.
    IngestBatch {
        /// Account the dataset belongs to
        #[arg(long, env = "EYEPOP_ACCOUNT_ID")]
        account_id: String,

        /// Dataset API base URL
        #[arg(long, env = "EYEPOP_DATA_URL", default_value = DEFAULT_DATA_URL)]
        data_url: String,

        /// Target dataset
        dataset_id: String,

        /// JSON manifest, image paths are relative to it
        manifest: PathBuf,

        /// Label of entries that do not name one
        #[arg(long, default_value = "room")]
        label: String,

        /// Seconds between two status checks
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        poll_interval_secs: u64,

        /// Status checks before giving up
        #[arg(long, default_value_t = DEFAULT_MAX_POLL_ATTEMPTS)]
        max_poll_attempts: u32,

        /// Seconds to wait for each upload to return an asset
        #[arg(long, default_value_t = DEFAULT_UPLOAD_TIMEOUT.as_secs())]
        upload_timeout_secs: u64,
    },
    /// Download every asset of a dataset and write one COCO annotation file.
    Export {
        /// Account the dataset belongs to
        #[arg(long, env = "EYEPOP_ACCOUNT_ID")]
        account_id: String,

        /// Dataset API base URL
        #[arg(long, env = "EYEPOP_DATA_URL", default_value = DEFAULT_DATA_URL)]
        data_url: String,

        /// Dataset to export
        dataset_id: String,

        /// Output directory, receives data/ and annotations/annotations.json
        output_dir: PathBuf,

        /// Dataset version to download
        #[arg(long)]
        dataset_version: Option<String>,

        /// Only export annotation sets of this type, e.g. ground_truth
        #[arg(long)]
        annotation_type: Option<String>,

        /// Downloads in flight
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// First annotation id
        #[arg(long, default_value_t = 1)]
        annotation_id_offset: u64,
    },
    /// Copy images into has_object/ or no_object/ depending on what the model detects.
    Sort {
        /// Deployed pop to run predictions with
        #[arg(long, env = "EYEPOP_POP_ID")]
        pop_id: String,

        /// Worker API base URL
        #[arg(long, env = "EYEPOP_WORKER_URL", default_value = DEFAULT_WORKER_URL)]
        worker_url: String,

        /// Folder with the images to sort
        input_dir: PathBuf,

        /// Folder receiving json/, has_object/ and no_object/
        output_dir: PathBuf,

        /// Label to look for
        #[arg(long)]
        label: String,

        /// Confidence an object must exceed
        #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE, value_parser = validate_confidence)]
        min_confidence: f64,
    },
}

impl Args {
    pub fn endpoint(&self, base_url: &str) -> EndpointConfig {
        EndpointConfig {
            base_url: base_url.to_string(),
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl Command {
    /// Export tunables, `None` for other commands
    pub fn export_settings(&self) -> Option<ExportSettings> {
        match self {
            Command::Export {
                dataset_version,
                annotation_type,
                concurrency,
                annotation_id_offset,
                ..
            } => Some(ExportSettings {
                dataset_version: dataset_version.clone(),
                annotation_type: annotation_type.clone(),
                concurrency: *concurrency,
                annotation_id_offset: *annotation_id_offset,
            }),
            _ => None,
        }
    }
}

// Confidence must lie between 0.0 and 1.0
fn validate_confidence(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("confidence must be between 0.0 and 1.0".to_string()),
    }
}
