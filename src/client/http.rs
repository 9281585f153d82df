//! HTTP/JSON transport (KServe v2 REST protocol)

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PredictorConfig;
use crate::error::{Error, Result};

use super::{InferOutput, InferResult, InferenceBackend, InferenceJob};

#[derive(Debug, Serialize, Deserialize)]
struct V2Tensor {
    name: String,
    shape: Vec<i64>,
    datatype: String,
    data: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct V2RequestedOutput {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct V2InferRequest {
    inputs: Vec<V2Tensor>,
    outputs: Vec<V2RequestedOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
struct V2InferResponse {
    #[serde(default)]
    model_name: String,
    outputs: Vec<V2Tensor>,
}

/// Pooled HTTP backend
pub struct HttpBackend {
    endpoint: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &PredictorConfig) -> Result<Self> {
        let endpoint = config.http_host.clone();
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", endpoint.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.client_timeout())
            .pool_max_idle_per_host(config.concurrency)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        info!("HTTP client for {} created", base_url);

        Ok(Self {
            endpoint,
            base_url,
            client,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> Error {
        if err.is_connect() {
            Error::unavailable(&self.endpoint, err)
        } else {
            Error::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_ready(&self) -> Result<bool> {
        let url = format!("{}/v2/health/ready", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(response.status().is_success())
    }

    async fn infer(&self, job: &InferenceJob) -> Result<InferResult> {
        let url = format!("{}/v2/models/{}/infer", self.base_url, job.model);
        let body = V2InferRequest {
            inputs: job
                .inputs
                .iter()
                .map(|input| V2Tensor {
                    name: input.name.clone(),
                    shape: input.shape.clone(),
                    datatype: "FP32".to_string(),
                    data: input.data.clone(),
                })
                .collect(),
            outputs: job
                .outputs
                .iter()
                .map(|name| V2RequestedOutput { name: name.clone() })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE => Error::unavailable(&self.endpoint, text),
                _ => Error::Transport(format!("HTTP {}: {}", status.as_u16(), text)),
            });
        }

        let parsed: V2InferResponse = response.json().await.map_err(|e| self.map_error(e))?;

        Ok(InferResult {
            model_name: parsed.model_name,
            outputs: parsed
                .outputs
                .into_iter()
                .map(|t| InferOutput {
                    name: t.name,
                    shape: t.shape,
                    data: t.data,
                })
                .collect(),
        })
    }
}
