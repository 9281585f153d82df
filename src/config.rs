//! Transformer configuration

use std::io::ErrorKind;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::engine::preprocess::QUALITY_INPUT_SIZE;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub predictor: PredictorConfig,
    pub model: ModelConfig,
    pub hedging: HedgingConfig,
    pub images: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub http_port: u16,
}

/// Wire protocol used to reach the predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Persistent multiplexed gRPC channel
    Grpc,
    /// Pooled HTTP/JSON requests
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Ok(Protocol::Grpc),
            "http" => Ok(Protocol::Http),
            other => Err(Error::Config(format!("unknown protocol: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    /// `host:port` of the server's gRPC (persistent-connection) endpoint
    pub grpc_host: String,
    /// `host:port` of the server's HTTP (pooled request) endpoint
    pub http_host: String,
    pub protocol: Protocol,
    /// Maximum number of calls in flight across all requests
    pub concurrency: usize,
    pub client_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl PredictorConfig {
    /// Endpoint of the selected protocol
    pub fn endpoint(&self) -> &str {
        match self.protocol {
            Protocol::Grpc => &self.grpc_host,
            Protocol::Http => &self.http_host,
        }
    }

    /// Point the selected protocol at `host`
    pub fn set_endpoint(&mut self, host: String) {
        match self.protocol {
            Protocol::Grpc => self.grpc_host = host,
            Protocol::Http => self.http_host = host,
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Name the transformer is served under
    pub name: String,
    /// Model name on the inference server
    pub remote_model: String,
    pub input_name: String,
    pub output_name: String,
    pub input_size: u32,
}

/// How a batch is sent to the predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferMode {
    /// Single awaited call
    Sync,
    /// `fan_out` spawned calls awaited in dispatch order
    Future,
    /// `fan_out` callback calls collected through a channel
    Callback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HedgingConfig {
    pub mode: InferMode,
    /// Number of redundant calls issued per request
    pub fan_out: usize,
    pub per_item_timeout_ms: u64,
}

impl HedgingConfig {
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub fetch_timeout_ms: u64,
}

impl ImageConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("invalid configuration in {}", path))?;
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    /// Unreadable, malformed or invalid files are still errors.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        match std::fs::metadata(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path);
                Ok(Self::default())
            }
            _ => Self::load(path),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    pub fn validate(&self) -> Result<()> {
        if self.predictor.endpoint().is_empty() {
            return Err(Error::Config(format!(
                "predictor.{}_host must be set",
                self.predictor.protocol.as_str()
            )));
        }
        if self.predictor.concurrency == 0 {
            return Err(Error::Config("predictor.concurrency must be at least 1".to_string()));
        }
        if self.model.input_size == 0 {
            return Err(Error::Config("model.input_size must be positive".to_string()));
        }
        if self.hedging.per_item_timeout_ms == 0 {
            return Err(Error::Config("hedging.per_item_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { http_port: 8080 },
            predictor: PredictorConfig {
                grpc_host: "localhost:8001".to_string(),
                http_host: "localhost:8000".to_string(),
                protocol: Protocol::Grpc,
                concurrency: 100,
                client_timeout_ms: 30_000,
                connect_timeout_ms: 5_000,
            },
            model: ModelConfig {
                name: "model".to_string(),
                remote_model: "face_quality_trt_fp16".to_string(),
                input_name: "input.1".to_string(),
                output_name: "1346".to_string(),
                input_size: QUALITY_INPUT_SIZE,
            },
            hedging: HedgingConfig {
                mode: InferMode::Callback,
                fan_out: 500,
                per_item_timeout_ms: 2_000,
            },
            images: ImageConfig {
                fetch_timeout_ms: 10_000,
            },
        }
    }
}
