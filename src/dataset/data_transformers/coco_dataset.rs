mod asset2coco;
mod coco_dataset_struct;

pub use asset2coco::{
    convert_to_coco, image_annotations_from_asset, CategoryTable, CocoMerger, ImageAnnotations,
};
pub use coco_dataset_struct::{Annotation, Category, CocoDatasetJson, Image};
