//! Inference engine module
//!
//! - Image normalization into the model's input tensor
//! - Shared gateway to the remote predictor
//! - Hedged fan-out and last-arrival aggregation

pub mod batch;
pub mod coordinator;
pub mod gateway;
pub mod predictor;
pub mod preprocess;

pub use batch::{AggregatedResult, CompletionToken, JobResult};
pub use coordinator::BatchCoordinator;
pub use gateway::{GatewayStatus, InferenceGateway};
pub use predictor::QualityPredictor;
pub use preprocess::ImageNormalizer;
