//! Service layer types

use std::collections::BTreeMap;

use ndarray::Array4;
use serde::Serialize;

/// Normalized batch ready for the predictor
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// `(B, 3, S, S)` model input
    pub batch: Array4<f32>,
    /// Caller metadata from `extra_info.others`
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PreparedRequest {
    pub fn image_count(&self) -> usize {
        self.batch.shape()[0]
    }
}

/// Service health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub model: String,
    pub predictor: String,
    pub ready: bool,
    pub reconnects: u64,
    pub late_arrivals: usize,
    pub last_error: Option<String>,
}
