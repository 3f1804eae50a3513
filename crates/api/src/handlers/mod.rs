pub mod project;
pub mod segmentation;
