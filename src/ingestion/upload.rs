use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use async_std::future::timeout;
use image::ImageFormat;

use crate::dataset::common_structs::{AssetId, DatasetId};
use crate::dataset::DataService;
use crate::error::IngestError;

/// An image read from disk, with what the service needs to know about it
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

pub(crate) fn mime_type_of(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

impl ImageSource {
    pub fn from_path(path: &Path) -> Result<ImageSource, IngestError> {
        let bytes = fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        ImageSource::from_bytes(bytes, &file_name)
    }

    /// Detects the format from the content, never from the file extension.
    pub fn from_bytes(bytes: Vec<u8>, file_name: &str) -> Result<ImageSource, IngestError> {
        let unsupported = |reason: String| IngestError::Upload {
            external_id: file_name.to_string(),
            reason,
        };
        let format = image::guess_format(&bytes)
            .map_err(|e| unsupported(format!("unrecognized image: {}", e)))?;
        let mime_type = mime_type_of(format)
            .ok_or_else(|| unsupported(format!("{:?} images are not accepted", format)))?;
        let (width, height) = image::io::Reader::with_format(Cursor::new(&bytes), format)
            .into_dimensions()
            .map_err(|e| unsupported(format!("unreadable image: {}", e)))?;
        Ok(ImageSource {
            bytes,
            mime_type,
            width,
            height,
            file_name: file_name.to_string(),
        })
    }
}

/// Uploads an image and returns the id of the created asset.
///
/// There is no idempotency key, so any failure is final: a rejected payload, a call that did
/// not resolve within `upload_timeout`, or a response without asset id.
pub async fn upload_image<S: DataService + Sync + ?Sized>(
    service: &S,
    image: &ImageSource,
    dataset_id: &DatasetId,
    external_id: &str,
    upload_timeout: Duration,
) -> Result<AssetId, IngestError> {
    let upload = service.upload_asset(image.bytes.clone(), image.mime_type, dataset_id, external_id);
    let descriptor = match timeout(upload_timeout, upload).await {
        Ok(Ok(descriptor)) => descriptor,
        Ok(Err(e)) => {
            return Err(IngestError::Upload {
                external_id: external_id.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(IngestError::Upload {
                external_id: external_id.to_string(),
                reason: format!("no response within {:?}", upload_timeout),
            })
        }
    };
    descriptor.asset_id()
}
