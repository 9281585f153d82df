//! Service layer module

pub mod quality_service;
pub mod types;

pub use quality_service::QualityService;
pub use types::*;
