use std::fs::{self, File};
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use image::ImageFormat;
use log::{info, warn};

use crate::dataset::common_structs::{AssetDescriptor, AssetId, DatasetId};
use crate::dataset::data_transformers::coco_dataset::{
    image_annotations_from_asset, CocoDatasetJson, CocoMerger,
};
use crate::dataset::DataService;
use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub dataset_version: Option<String>,
    /// Number of downloads in flight
    pub concurrency: usize,
    /// Only annotation sets of this type are exported, all of them when unset
    pub annotation_type: Option<String>,
    pub annotation_id_offset: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            dataset_version: None,
            concurrency: 4,
            annotation_type: None,
            annotation_id_offset: 1,
        }
    }
}

#[derive(Debug)]
pub struct ExportReport {
    pub document: CocoDatasetJson,
    pub annotations_path: PathBuf,
    /// Assets left out of the document, one error each
    pub failures: Vec<IngestError>,
}

/// Downloads a whole dataset into `<out>/data` and writes one COCO file to
/// `<out>/annotations/annotations.json`.
pub struct DatasetExporter<'a, S: ?Sized> {
    service: &'a S,
    dataset_id: DatasetId,
    settings: ExportSettings,
}

impl<'a, S: DataService + Sync + ?Sized> DatasetExporter<'a, S> {
    pub fn new(service: &'a S, dataset_id: DatasetId, settings: ExportSettings) -> Self {
        DatasetExporter {
            service,
            dataset_id,
            settings,
        }
    }

    /// Exports every asset of the dataset.
    ///
    /// Downloads overlap, but assets are converted one at a time in listing order, so the
    /// category table has a single writer. A failing asset is logged and reported without
    /// touching what was already collected; only a failing listing aborts the export.
    pub async fn export_to(&self, output_dir: &Path) -> Result<ExportReport, IngestError> {
        let assets = self
            .service
            .list_assets(&self.dataset_id, true)
            .await
            .map_err(|e| IngestError::remote(format!("dataset {}", self.dataset_id), e))?;
        info!("Found {} assets in dataset {}", assets.len(), self.dataset_id);

        let data_dir = output_dir.join("data");
        let annotations_dir = output_dir.join("annotations");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&annotations_dir)?;

        let version = self.settings.dataset_version.as_deref();
        let downloads = stream::iter(assets.iter())
            .map(|asset| async move {
                let asset_id = asset.asset_id()?;
                info!("Downloading asset {}", asset_id);
                let bytes = self
                    .service
                    .download_asset(&asset_id, &self.dataset_id, version)
                    .await
                    .map_err(|e| IngestError::remote(asset_id.to_string(), e))?;
                Ok::<_, IngestError>((asset, asset_id, bytes))
            })
            .buffered(self.settings.concurrency.max(1));
        futures::pin_mut!(downloads);

        let mut merger = CocoMerger::new(self.settings.annotation_id_offset);
        let mut failures = vec![];
        while let Some(downloaded) = downloads.next().await {
            let stored = downloaded.and_then(|(asset, asset_id, bytes)| {
                self.store_asset(&mut merger, &data_dir, asset, &asset_id, &bytes)
            });
            if let Err(e) = stored {
                warn!("Skipping asset: {}", e);
                failures.push(e);
            }
        }

        let document = merger.into_parts().0;
        let annotations_path = annotations_dir.join("annotations.json");
        let writer = BufWriter::new(File::create(&annotations_path)?);
        serde_json::to_writer_pretty(writer, &document)?;
        info!(
            "Wrote {} images, {} annotations and {} categories to {}",
            document.images.len(),
            document.annotations.len(),
            document.categories.len(),
            annotations_path.display()
        );

        Ok(ExportReport {
            document,
            annotations_path,
            failures,
        })
    }

    fn store_asset(
        &self,
        merger: &mut CocoMerger,
        data_dir: &Path,
        asset: &AssetDescriptor,
        asset_id: &AssetId,
        bytes: &[u8],
    ) -> Result<(), IngestError> {
        let format = image::guess_format(bytes).ok();
        let extension = format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg");
        let decoded_size = format.and_then(|f| decoded_size(bytes, f));
        let file_name = format!("{}.{}", asset_id, extension);

        let converted = image_annotations_from_asset(
            asset,
            &file_name,
            self.settings.annotation_type.as_deref(),
            decoded_size,
        )?;
        let image_path = data_dir.join(&file_name);
        fs::write(&image_path, bytes)?;
        if let Err(e) = merger.add_image(&converted) {
            fs::remove_file(&image_path)?;
            return Err(e);
        }
        Ok(())
    }
}

fn decoded_size(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    image::io::Reader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::common_structs::{AnnotationRecord, AssetAnnotation, Prediction};
    use crate::dataset::testing::{png_bytes, FakeDataService};
    use crate::error::RemoteError;

    fn labeled_asset(uuid: &str, objects: Vec<AnnotationRecord>) -> AssetDescriptor {
        AssetDescriptor {
            uuid: Some(uuid.to_string()),
            annotations: Some(vec![AssetAnnotation {
                kind: Some("ground_truth".to_string()),
                user_review: Some("approved".to_string()),
                annotation: Some(Prediction {
                    source_width: 0.0,
                    source_height: 0.0,
                    objects: objects.iter().map(|r| r.to_object(0)).collect(),
                }),
            }]),
            ..Default::default()
        }
    }

    fn service_with(assets: Vec<AssetDescriptor>, downloadable: &[&str]) -> FakeDataService {
        let mut service = FakeDataService::default();
        *service.list_response.lock().unwrap() = Some(Ok(assets));
        for uuid in downloadable {
            service
                .downloads
                .insert(uuid.to_string(), Ok(png_bytes(16, 8)));
        }
        service
    }

    #[async_std::test]
    async fn merges_assets_and_isolates_failures() {
        let mut malformed = labeled_asset("c", vec![AnnotationRecord::new("cat", 0.0, 0.0, 1.0, 1.0)]);
        malformed.annotations.as_mut().unwrap()[0]
            .annotation
            .as_mut()
            .unwrap()
            .objects[0]
            .height = None;
        let assets = vec![
            labeled_asset("a", vec![AnnotationRecord::new("cat", 10.0, 10.0, 20.0, 20.0)]),
            malformed,
            labeled_asset("missing", vec![]),
            labeled_asset(
                "b",
                vec![
                    AnnotationRecord::new("dog", 0.0, 0.0, 5.0, 5.0),
                    AnnotationRecord::new("cat", 1.0, 1.0, 2.0, 2.0),
                ],
            ),
        ];
        let service = service_with(assets, &["a", "b", "c"]);
        let out = tempfile::tempdir().unwrap();

        let report = DatasetExporter::new(
            &service,
            DatasetId("ds".to_string()),
            ExportSettings::default(),
        )
        .export_to(out.path())
        .await
        .unwrap();

        let document = &report.document;
        let files: Vec<_> = document.images.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(files, vec!["a.png", "b.png"]);
        assert_eq!((document.images[0].width, document.images[0].height), (16, 8));
        let names: Vec<_> = document.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cat", "dog"]);
        let categories: Vec<_> = document.annotations.iter().map(|a| a.category_id).collect();
        assert_eq!(categories, vec![1, 2, 1]);
        let ids: Vec<_> = document.annotations.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[0],
            IngestError::MalformedAnnotation { ref asset_id, .. } if asset_id == "c"
        ));
        assert!(matches!(
            report.failures[1],
            IngestError::RemoteUnavailable { ref context, .. } if context == "missing"
        ));

        assert!(out.path().join("data/a.png").exists());
        assert!(!out.path().join("data/c.png").exists());
        let written: CocoDatasetJson =
            serde_json::from_reader(File::open(&report.annotations_path).unwrap()).unwrap();
        assert_eq!(&written, document);
    }

    #[async_std::test]
    async fn passes_dataset_version_and_offset() {
        let service = service_with(
            vec![labeled_asset("a", vec![AnnotationRecord::new("cat", 0.0, 0.0, 2.0, 3.0)])],
            &["a"],
        );
        let out = tempfile::tempdir().unwrap();
        let settings = ExportSettings {
            dataset_version: Some("3".to_string()),
            annotation_id_offset: 100,
            concurrency: 1,
            ..Default::default()
        };

        let report = DatasetExporter::new(&service, DatasetId("ds".to_string()), settings)
            .export_to(out.path())
            .await
            .unwrap();

        assert_eq!(report.document.annotations[0].id, 100);
        assert_eq!(report.document.annotations[0].area, 6.0);
        assert_eq!(
            service.calls(),
            vec!["list true".to_string(), "download a Some(\"3\")".to_string()]
        );
    }

    #[async_std::test]
    async fn integer_class_labels_do_not_break_the_listing() {
        let listing: Vec<AssetDescriptor> = serde_json::from_str(
            r#"[
                {"uuid": "a", "annotations": [{"type": "ground_truth", "annotation": {
                    "source_width": 16, "source_height": 8,
                    "objects": [{"classLabel": "cat", "x": 1, "y": 1, "width": 4, "height": 4}]}}]},
                {"uuid": "b", "annotations": [{"type": "ground_truth", "annotation": {
                    "source_width": 16, "source_height": 8,
                    "objects": [{"classLabel": 3, "x": 0, "y": 0, "width": 2, "height": 5},
                                {"classLabel": "cat", "x": 2, "y": 2, "width": 1, "height": 1}]}}]}
            ]"#,
        )
        .unwrap();
        let service = service_with(listing, &["a", "b"]);
        let out = tempfile::tempdir().unwrap();

        let report = DatasetExporter::new(
            &service,
            DatasetId("ds".to_string()),
            ExportSettings::default(),
        )
        .export_to(out.path())
        .await
        .unwrap();

        assert!(report.failures.is_empty());
        let document = &report.document;
        assert_eq!(document.images.len(), 2);
        let names: Vec<_> = document.categories.iter().map(|c| (c.id, c.name.as_str())).collect();
        assert_eq!(names, vec![(1, "cat"), (2, "3")]);
        let categories: Vec<_> = document.annotations.iter().map(|a| a.category_id).collect();
        assert_eq!(categories, vec![1, 2, 1]);
        assert_eq!(document.annotations[1].area, 10.0);
    }

    #[async_std::test]
    async fn exhausted_annotation_ids_skip_the_asset() {
        let service = service_with(
            vec![
                labeled_asset("a", vec![AnnotationRecord::new("cat", 0.0, 0.0, 1.0, 1.0)]),
                labeled_asset(
                    "b",
                    vec![
                        AnnotationRecord::new("dog", 0.0, 0.0, 1.0, 1.0),
                        AnnotationRecord::new("dog", 1.0, 1.0, 1.0, 1.0),
                    ],
                ),
            ],
            &["a", "b"],
        );
        let out = tempfile::tempdir().unwrap();
        let settings = ExportSettings {
            annotation_id_offset: u64::MAX - 1,
            ..Default::default()
        };

        let report = DatasetExporter::new(&service, DatasetId("ds".to_string()), settings)
            .export_to(out.path())
            .await
            .unwrap();

        assert_eq!(report.document.images.len(), 1);
        assert_eq!(report.document.annotations[0].id, u64::MAX - 1);
        assert!(matches!(
            report.failures.as_slice(),
            [IngestError::AnnotationIdOverflow { count: 2, .. }]
        ));
        assert!(!out.path().join("data/b.png").exists());
    }

    #[async_std::test]
    async fn failing_listing_aborts() {
        let service = FakeDataService::default();
        *service.list_response.lock().unwrap() =
            Some(Err(RemoteError::Unavailable("down".to_string())));
        let out = tempfile::tempdir().unwrap();

        let result = DatasetExporter::new(
            &service,
            DatasetId("ds".to_string()),
            ExportSettings::default(),
        )
        .export_to(out.path())
        .await;
        assert!(matches!(result, Err(IngestError::RemoteUnavailable { .. })));
    }
}
