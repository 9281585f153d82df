//! Inference server clients
//!
//! Transport-level view of the remote predictor:
//! - `InferenceJob` / `InferResult` tensor containers
//! - `InferenceBackend`, the capability every transport implements
//! - gRPC (tonic) and HTTP/JSON (reqwest) transports speaking KServe v2

pub mod grpc;
pub mod http;

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};

pub use grpc::GrpcBackend;
pub use http::HttpBackend;

/// FP32 input tensor
#[derive(Debug, Clone, PartialEq)]
pub struct InferInput {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl InferInput {
    pub fn from_array<D: ndarray::Dimension>(name: &str, array: &ndarray::Array<f32, D>) -> Self {
        Self {
            name: name.to_string(),
            shape: array.shape().iter().map(|&d| d as i64).collect(),
            data: array.iter().copied().collect(),
        }
    }
}

/// One unit of work for the predictor. Immutable once submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceJob {
    pub model: String,
    pub inputs: Vec<InferInput>,
    pub outputs: Vec<String>,
}

impl InferenceJob {
    pub fn new(model: impl Into<String>, inputs: Vec<InferInput>, outputs: Vec<String>) -> Self {
        Self {
            model: model.into(),
            inputs,
            outputs,
        }
    }

    /// Leading dimension of the first input, i.e. the number of images
    pub fn batch_size(&self) -> usize {
        self.inputs
            .first()
            .and_then(|input| input.shape.first())
            .map(|&d| d.max(0) as usize)
            .unwrap_or(0)
    }
}

/// FP32 output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct InferOutput {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Raw predictor response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferResult {
    pub model_name: String,
    pub outputs: Vec<InferOutput>,
}

impl InferResult {
    pub fn output(&self, name: &str) -> Option<&InferOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// View a named output as an n-dimensional array
    pub fn as_array(&self, name: &str) -> Result<ArrayD<f32>> {
        let output = self
            .output(name)
            .ok_or_else(|| Error::Transport(format!("missing output tensor {}", name)))?;

        let shape: Vec<usize> = output.shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&shape), output.data.clone()).map_err(|e| {
            Error::Transport(format!("output tensor {} has inconsistent shape: {}", name, e))
        })
    }
}

/// A remote inference server.
///
/// Implementations are shared by every in-flight request and must tolerate
/// concurrent calls.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    /// `host:port` the backend talks to
    fn endpoint(&self) -> &str;

    /// Server readiness probe
    async fn is_ready(&self) -> Result<bool>;

    /// Run one inference call
    async fn infer(&self, job: &InferenceJob) -> Result<InferResult>;
}

pub(crate) fn f32_to_le_bytes(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn f32_from_le_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Transport(format!(
            "raw tensor length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_input_from_array() {
        let array = Array4::<f32>::ones((2, 3, 4, 4));
        let input = InferInput::from_array("input.1", &array);
        assert_eq!(input.shape, vec![2, 3, 4, 4]);
        assert_eq!(input.data.len(), 96);

        let job = InferenceJob::new("m", vec![input], vec!["1346".to_string()]);
        assert_eq!(job.batch_size(), 2);
    }

    #[test]
    fn test_raw_bytes_conversion() {
        let data = vec![0.5f32, -1.25, 3.0];
        let bytes = f32_to_le_bytes(&data);
        assert_eq!(bytes.len(), 12);
        assert_eq!(f32_from_le_bytes(&bytes).unwrap(), data);
        assert!(f32_from_le_bytes(&bytes[..5]).is_err());
    }

    #[test]
    fn test_result_as_array() {
        let result = InferResult {
            model_name: "m".to_string(),
            outputs: vec![InferOutput {
                name: "1346".to_string(),
                shape: vec![2, 1],
                data: vec![0.1, 0.2],
            }],
        };
        assert_eq!(result.as_array("1346").unwrap().shape(), &[2, 1]);
        assert!(result.as_array("missing").is_err());

        let mut broken = result.clone();
        broken.outputs[0].shape = vec![3, 1];
        assert!(broken.as_array("1346").is_err());
    }
}
