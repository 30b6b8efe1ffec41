pub mod classify;
pub mod composite;
pub mod rasterize;
pub mod segmentation;
pub mod upload;
