pub mod axis;
pub mod browser;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod retry;
pub mod transform;

pub use error::HeatmapError;
pub use payload::{SparseEntry, SparseHeatmapPayload};
pub use transform::{densify, DenseMatrix, TransformOptions, TransformReport};
