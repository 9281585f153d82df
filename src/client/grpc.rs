//! gRPC transport (KServe v2 `GRPCInferenceService`)
//!
//! One tonic `Channel` is opened per backend and cloned into every call;
//! HTTP/2 multiplexes concurrent calls over it.

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, info};

use crate::config::PredictorConfig;
use crate::error::{Error, Result};

use super::{f32_from_le_bytes, f32_to_le_bytes, InferOutput, InferResult, InferenceBackend, InferenceJob};

// Include generated protobuf code
pub mod proto {
    tonic::include_proto!("inference");
}

use proto::grpc_inference_service_client::GrpcInferenceServiceClient;
use proto::model_infer_request::{InferInputTensor, InferRequestedOutputTensor};
use proto::{ModelInferRequest, ModelInferResponse, ServerLiveRequest, ServerReadyRequest};

/// Large batches of 112x112 images exceed tonic's 4MB default
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const FP32: &str = "FP32";

/// Persistent-connection backend
pub struct GrpcBackend {
    endpoint: String,
    client: GrpcInferenceServiceClient<Channel>,
}

impl GrpcBackend {
    /// Open the channel to `config.grpc_host`
    pub async fn connect(config: &PredictorConfig) -> Result<Self> {
        let host = config.grpc_host.clone();
        let uri = if host.starts_with("http://") || host.starts_with("https://") {
            host.clone()
        } else {
            format!("http://{}", host)
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| Error::Config(format!("invalid predictor host {}: {}", host, e)))?
            .connect_timeout(config.connect_timeout())
            .timeout(config.client_timeout())
            .connect()
            .await
            .map_err(|e| Error::unavailable(&host, e))?;

        info!("gRPC channel to {} established", host);

        let client = GrpcInferenceServiceClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);

        Ok(Self {
            endpoint: host,
            client,
        })
    }

    /// Liveness probe
    pub async fn is_live(&self) -> Result<bool> {
        let mut client = self.client.clone();
        let response = client
            .server_live(ServerLiveRequest {})
            .await
            .map_err(|s| map_status(&self.endpoint, s))?;
        Ok(response.into_inner().live)
    }
}

#[async_trait]
impl InferenceBackend for GrpcBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_ready(&self) -> Result<bool> {
        let mut client = self.client.clone();
        let response = client
            .server_ready(ServerReadyRequest {})
            .await
            .map_err(|s| map_status(&self.endpoint, s))?;
        Ok(response.into_inner().ready)
    }

    async fn infer(&self, job: &InferenceJob) -> Result<InferResult> {
        let request = build_request(job);
        let mut client = self.client.clone();

        let response = client
            .model_infer(request)
            .await
            .map_err(|s| map_status(&self.endpoint, s))?;

        parse_response(response.into_inner())
    }
}

fn map_status(endpoint: &str, status: tonic::Status) -> Error {
    match status.code() {
        Code::Unavailable => Error::unavailable(endpoint, status.message()),
        _ => Error::from(status),
    }
}

/// Inputs are sent as little-endian raw contents, one entry per input
fn build_request(job: &InferenceJob) -> ModelInferRequest {
    let inputs = job
        .inputs
        .iter()
        .map(|input| InferInputTensor {
            name: input.name.clone(),
            datatype: FP32.to_string(),
            shape: input.shape.clone(),
            ..Default::default()
        })
        .collect();

    let outputs = job
        .outputs
        .iter()
        .map(|name| InferRequestedOutputTensor {
            name: name.clone(),
            ..Default::default()
        })
        .collect();

    ModelInferRequest {
        model_name: job.model.clone(),
        inputs,
        outputs,
        raw_input_contents: job.inputs.iter().map(|i| f32_to_le_bytes(&i.data)).collect(),
        ..Default::default()
    }
}

fn parse_response(response: ModelInferResponse) -> Result<InferResult> {
    let mut outputs = Vec::with_capacity(response.outputs.len());

    for (idx, tensor) in response.outputs.into_iter().enumerate() {
        if tensor.datatype != FP32 {
            return Err(Error::Transport(format!(
                "output {} has unsupported datatype {}",
                tensor.name, tensor.datatype
            )));
        }

        let data = match response.raw_output_contents.get(idx) {
            Some(raw) => f32_from_le_bytes(raw)?,
            None => tensor.contents.map(|c| c.fp32_contents).unwrap_or_default(),
        };
        debug!("Received output {} with shape {:?}", tensor.name, tensor.shape);

        outputs.push(InferOutput {
            name: tensor.name,
            shape: tensor.shape,
            data,
        });
    }

    Ok(InferResult {
        model_name: response.model_name,
        outputs,
    })
}
