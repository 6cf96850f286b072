use std::collections::HashMap;

use super::coco_dataset_struct::{Annotation, Category, CocoDatasetJson, Image};
use crate::dataset::common_structs::{AnnotationRecord, AssetDescriptor};
use crate::error::IngestError;

const SUPERCATEGORY: &str = "none";

/// One image and the validated objects labeled on it
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnnotations {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub records: Vec<AnnotationRecord>,
}

/// Label name to COCO category id. The first label seen gets id 1, the next one 2, and so on.
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    ids: HashMap<String, u64>,
    categories: Vec<Category>,
}

impl CategoryTable {
    pub fn new() -> CategoryTable {
        CategoryTable::default()
    }

    /// Returns the id of `label`, registering it if it was never seen.
    pub fn resolve(&mut self, label: &str) -> u64 {
        if let Some(id) = self.ids.get(label) {
            return *id;
        }
        let id = self.categories.len() as u64 + 1;
        self.ids.insert(label.to_string(), id);
        self.categories.push(Category {
            id,
            name: label.to_string(),
            supercategory: SUPERCATEGORY.to_string(),
        });
        id
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.ids.get(label).copied()
    }

    /// Categories in registration order
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

}

/// Accumulates images into a single COCO document.
///
/// Images are numbered from 1 in insertion order, annotations from the offset given at
/// construction. Labels are resolved through one [`CategoryTable`], so the same label on two
/// different images always ends up with the same `category_id`.
#[derive(Debug, Clone)]
pub struct CocoMerger {
    table: CategoryTable,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    next_image_id: u64,
    next_annotation_id: u64,
}

impl CocoMerger {
    pub fn new(annotation_id_offset: u64) -> CocoMerger {
        CocoMerger::with_table(CategoryTable::new(), annotation_id_offset)
    }

    /// Continues numbering categories from an existing table
    pub fn with_table(table: CategoryTable, annotation_id_offset: u64) -> CocoMerger {
        CocoMerger {
            table,
            images: vec![],
            annotations: vec![],
            next_image_id: 1,
            next_annotation_id: annotation_id_offset,
        }
    }

    /// Adds one image entry and one annotation entry per record. Returns the image id.
    ///
    /// Fails without touching the document when the annotation ids would overflow.
    pub fn add_image(&mut self, image: &ImageAnnotations) -> Result<u64, IngestError> {
        let count = image.records.len();
        self.next_annotation_id
            .checked_add(count as u64)
            .ok_or(IngestError::AnnotationIdOverflow {
                next_id: self.next_annotation_id,
                count,
            })?;
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.images.push(Image {
            id: image_id,
            width: image.width,
            height: image.height,
            file_name: image.file_name.clone(),
        });
        for record in &image.records {
            let category_id = self.table.resolve(&record.label);
            let bbox = record.bbox;
            self.annotations.push(Annotation {
                id: self.next_annotation_id,
                image_id,
                category_id,
                bbox: [bbox.x, bbox.y, bbox.width, bbox.height],
                area: bbox.area(),
                iscrowd: 0,
            });
            self.next_annotation_id += 1;
        }
        Ok(image_id)
    }

    /// Finishes the document and hands the table back for further conversions.
    pub fn into_parts(self) -> (CocoDatasetJson, CategoryTable) {
        let document = CocoDatasetJson {
            images: self.images,
            annotations: self.annotations,
            categories: self.table.categories().to_vec(),
        };
        (document, self.table)
    }
}

/// Converts a batch of images into one document with a fresh category table.
pub fn convert_to_coco(
    images: &[ImageAnnotations],
    annotation_id_offset: u64,
) -> Result<CocoDatasetJson, IngestError> {
    let mut merger = CocoMerger::new(annotation_id_offset);
    for image in images {
        merger.add_image(image)?;
    }
    Ok(merger.into_parts().0)
}

/// Collects and validates every object of an asset.
///
/// Only annotation sets whose type equals `annotation_type` are used when it is set. The image
/// size comes from the first annotation set carrying a source size, or from `fallback_size`.
/// Nothing is returned unless every object is valid, so a bad asset never leaves half of its
/// entries in a merged document.
pub fn image_annotations_from_asset(
    asset: &AssetDescriptor,
    file_name: &str,
    annotation_type: Option<&str>,
    fallback_size: Option<(u32, u32)>,
) -> Result<ImageAnnotations, IngestError> {
    let asset_id = asset.asset_id()?;
    let predictions = asset
        .annotations()
        .iter()
        .filter(|set| match annotation_type {
            Some(kind) => set.kind.as_deref() == Some(kind),
            None => true,
        })
        .filter_map(|set| set.annotation.as_ref())
        .collect::<Vec<_>>();

    let mut records = vec![];
    for prediction in &predictions {
        for object in &prediction.objects {
            let record = AnnotationRecord::from_object(object).map_err(|reason| {
                IngestError::MalformedAnnotation {
                    asset_id: asset_id.to_string(),
                    reason,
                }
            })?;
            records.push(record);
        }
    }

    let source_size = predictions
        .iter()
        .find(|p| p.source_width > 0.0 && p.source_height > 0.0)
        .map(|p| (p.source_width.round() as u32, p.source_height.round() as u32));
    let (width, height) = source_size.or(fallback_size).ok_or_else(|| {
        IngestError::MalformedAnnotation {
            asset_id: asset_id.to_string(),
            reason: "image size is unknown".to_string(),
        }
    })?;

    Ok(ImageAnnotations {
        file_name: file_name.to_string(),
        width,
        height,
        records,
    })
}
