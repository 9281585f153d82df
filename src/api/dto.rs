//! Request/response envelopes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Provenance tag attached to every score record
pub const SCORE_SOURCE: &str = "face_quality_score";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestData {
    /// Image reference: `http...`, `path:...` or `data:...;base64,...`
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others: Option<BTreeMap<String, serde_json::Value>>,
}

/// Single-image request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub data: RequestData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<ExtraInfo>,
}

/// Batch request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiRequest {
    pub multi_data: Vec<Request>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<ExtraInfo>,
}

/// Either request shape; anything carrying `multi_data` is a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestEnvelope {
    Multi(MultiRequest),
    Single(Request),
}

impl RequestEnvelope {
    pub fn is_multi(&self) -> bool {
        matches!(self, RequestEnvelope::Multi(_))
    }

    /// Image references in input order; items without one are skipped
    pub fn items(&self) -> Vec<&str> {
        match self {
            RequestEnvelope::Multi(multi) => multi
                .multi_data
                .iter()
                .filter_map(|req| req.data.item.as_deref())
                .collect(),
            RequestEnvelope::Single(req) => req.data.item.as_deref().into_iter().collect(),
        }
    }

    /// Envelope-level `extra_info.others`
    pub fn metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let extra = match self {
            RequestEnvelope::Multi(multi) => multi.extra_info.as_ref(),
            RequestEnvelope::Single(req) => req.extra_info.as_ref(),
        };
        extra.and_then(|e| e.others.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseItem {
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub data: Vec<ResponseItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<ExtraInfo>,
}

impl Response {
    pub fn score(score: f32) -> Self {
        Self {
            data: vec![ResponseItem { score }],
            extra_info: Some(ExtraInfo {
                source: Some(SCORE_SOURCE.to_string()),
                others: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiResponse {
    pub multi_data: Vec<Response>,
}

/// Model readiness
#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub name: String,
    pub ready: bool,
}

/// Served models
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

/// Liveness
#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub status: String,
}

/// Metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub uptime_seconds: u64,
    pub predictor: String,
    pub predictor_ready: bool,
    pub reconnects: u64,
    pub late_arrivals: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
