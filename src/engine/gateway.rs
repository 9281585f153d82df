//! Remote Inference Gateway
//!
//! Shared handle to the predictor. Probes readiness on construction,
//! re-probes after the connection is reported lost, and caps the number of
//! calls in flight. Cloning is cheap; all clones share one connection.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{InferResult, InferenceBackend, InferenceJob};
use crate::config::PredictorConfig;
use crate::error::{Error, Result};

/// Connection state reported by `status`
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub endpoint: String,
    pub ready: bool,
    pub closed: bool,
    pub reconnects: u64,
    pub last_error: Option<String>,
}

struct ConnectionState {
    ready: bool,
    closed: bool,
    reconnects: u64,
    last_error: Option<String>,
    last_probe: Instant,
}

struct GatewayInner {
    backend: Arc<dyn InferenceBackend>,
    state: RwLock<ConnectionState>,
    // Serializes re-probes so a burst of failures triggers one probe
    reconnect: Mutex<()>,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct InferenceGateway {
    inner: Arc<GatewayInner>,
}

impl InferenceGateway {
    /// Wrap `backend` and fail fast if the server is not ready
    pub async fn connect(backend: Arc<dyn InferenceBackend>, config: &PredictorConfig) -> Result<Self> {
        let endpoint = backend.endpoint().to_string();
        let start = Instant::now();

        match backend.is_ready().await {
            Ok(true) => {}
            Ok(false) => return Err(Error::unavailable(&endpoint, "server reported not ready")),
            Err(e) => return Err(Error::unavailable(&endpoint, e)),
        }

        info!("Inference server {} ready ({:?})", endpoint, start.elapsed());

        Ok(Self {
            inner: Arc::new(GatewayInner {
                backend,
                state: RwLock::new(ConnectionState {
                    ready: true,
                    closed: false,
                    reconnects: 0,
                    last_error: None,
                    last_probe: Instant::now(),
                }),
                reconnect: Mutex::new(()),
                permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.inner.backend.endpoint()
    }

    /// Ask the server directly, bypassing cached state
    pub async fn is_ready(&self) -> bool {
        if self.inner.state.read().closed {
            return false;
        }
        matches!(self.inner.backend.is_ready().await, Ok(true))
    }

    pub fn status(&self) -> GatewayStatus {
        let state = self.inner.state.read();
        GatewayStatus {
            endpoint: self.endpoint().to_string(),
            ready: state.ready && !state.closed,
            closed: state.closed,
            reconnects: state.reconnects,
            last_error: state.last_error.clone(),
        }
    }

    /// Run one call and wait for its result
    pub async fn infer_sync(&self, job: &InferenceJob) -> Result<InferResult> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| Error::unavailable(self.endpoint(), "gateway closed"))?;

        self.ensure_ready().await?;

        let result = self.inner.backend.infer(job).await;
        if let Err(ref e) = result {
            if e.is_unavailable() {
                self.mark_disconnected(e);
            }
        }
        result
    }

    /// Start one call and return a handle to its result
    pub fn infer_future(&self, job: Arc<InferenceJob>) -> JoinHandle<Result<InferResult>> {
        let gateway = self.clone();
        tokio::spawn(async move { gateway.infer_sync(&job).await })
    }

    /// Start one call; `callback` runs exactly once, on a runtime worker,
    /// when the call completes or fails
    pub fn infer_callback<F>(&self, job: Arc<InferenceJob>, callback: F)
    where
        F: FnOnce(Result<InferResult>) + Send + 'static,
    {
        let gateway = self.clone();
        tokio::spawn(async move {
            let result = gateway.infer_sync(&job).await;
            callback(result);
        });
    }

    /// Stop accepting calls. Calls already running finish normally.
    pub fn close(&self) {
        let mut state = self.inner.state.write();
        if !state.closed {
            info!("Closing inference gateway to {}", self.endpoint());
            state.closed = true;
            state.ready = false;
            self.inner.permits.close();
        }
    }

    /// Cheap when connected; re-probes once the connection was reported lost
    async fn ensure_ready(&self) -> Result<()> {
        {
            let state = self.inner.state.read();
            if state.closed {
                return Err(Error::unavailable(self.endpoint(), "gateway closed"));
            }
            if state.ready {
                return Ok(());
            }
        }

        let _guard = self.inner.reconnect.lock().await;

        // Double-check after acquiring the probe lock
        {
            let state = self.inner.state.read();
            if state.closed {
                return Err(Error::unavailable(self.endpoint(), "gateway closed"));
            }
            if state.ready {
                return Ok(());
            }
        }

        info!("Re-probing inference server {}", self.endpoint());
        let probe = self.inner.backend.is_ready().await;

        let mut state = self.inner.state.write();
        state.last_probe = Instant::now();
        match probe {
            Ok(true) => {
                state.ready = true;
                state.reconnects += 1;
                state.last_error = None;
                info!("Inference server {} is ready again", self.endpoint());
                Ok(())
            }
            Ok(false) => {
                state.last_error = Some("server reported not ready".to_string());
                Err(Error::unavailable(self.endpoint(), "server reported not ready"))
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                Err(Error::unavailable(self.endpoint(), e))
            }
        }
    }

    fn mark_disconnected(&self, err: &Error) {
        let mut state = self.inner.state.write();
        if state.ready {
            warn!(
                "Lost inference server {} ({}s since last probe): {}",
                self.endpoint(),
                state.last_probe.elapsed().as_secs(),
                err
            );
        }
        state.ready = false;
        state.last_error = Some(err.to_string());
    }
}
