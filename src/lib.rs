//! Upload images into a hosted vision dataset, attach ground truth, and export
//! datasets as COCO detection documents.

pub mod config;
pub mod dataset;
pub mod error;
pub mod ingestion;
pub mod sorting;

pub use error::{IngestError, RemoteError};
