//! Face Quality Predictor
//!
//! Binds the remote model and its tensor names. Turns a normalized batch into
//! an `InferenceJob` and the raw response back into one score per image.

use ndarray::{Array4, Axis};

use crate::client::{InferInput, InferResult, InferenceJob};
use crate::config::ModelConfig;
use crate::error::{Error, Result};

use super::batch::JobResult;

#[derive(Debug, Clone)]
pub struct QualityPredictor {
    remote_model: String,
    input_name: String,
    output_name: String,
}

impl QualityPredictor {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            remote_model: config.remote_model.clone(),
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
        }
    }

    /// Build the job for a `(B, 3, H, W)` batch
    pub fn job(&self, batch: &Array4<f32>) -> InferenceJob {
        InferenceJob::new(
            self.remote_model.clone(),
            vec![InferInput::from_array(&self.input_name, batch)],
            vec![self.output_name.clone()],
        )
    }

    /// Squeeze the trailing unit axis of the score tensor
    pub fn decode_scores(&self, result: &InferResult, expected: usize) -> Result<Vec<f32>> {
        let array = result.as_array(&self.output_name)?;

        let scores: Vec<f32> = match array.ndim() {
            0 => return Err(Error::Transport("score tensor is a scalar".to_string())),
            1 => array.iter().copied().collect(),
            n => {
                if array.shape()[n - 1] != 1 {
                    return Err(Error::Transport(format!(
                        "score tensor has shape {:?}, expected a trailing axis of 1",
                        array.shape()
                    )));
                }
                array.index_axis_move(Axis(n - 1), 0).iter().copied().collect()
            }
        };

        if scores.len() != expected {
            return Err(Error::Transport(format!(
                "expected {} scores, got {}",
                expected,
                scores.len()
            )));
        }

        Ok(scores)
    }

    /// Fold a call outcome into a `JobResult`
    pub fn to_job_result(&self, outcome: Result<InferResult>, expected: usize) -> JobResult {
        match outcome.and_then(|result| self.decode_scores(&result, expected)) {
            Ok(scores) => JobResult::Scores(scores),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
