//! Face Quality Service
//!
//! Transformer in front of a KServe v2 inference server: normalizes face
//! images, scores them with hedged remote calls and serves the scores over
//! REST (Axum). The predictor is reached over gRPC (Tonic) or HTTP.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use facequality::api::rest::{create_rest_router, AppState};
use facequality::client::grpc::GrpcBackend;
use facequality::client::http::HttpBackend;
use facequality::client::InferenceBackend;
use facequality::config::{Config, Protocol};
use facequality::engine::InferenceGateway;
use facequality::service::QualityService;

#[derive(Debug, Parser)]
#[command(name = "facequality", version, about = "Face quality scoring transformer")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = Config::default_path())]
    config: String,

    /// Name the model is served under
    #[arg(long)]
    model_name: Option<String>,

    /// Inference server `host:port` for the selected protocol
    #[arg(long)]
    predictor_host: Option<String>,

    #[arg(long)]
    http_port: Option<u16>,

    /// `grpc` or `http`
    #[arg(long)]
    protocol: Option<Protocol>,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .init();

    info!("Starting Face Quality Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; only the default path may be absent
    let mut config = if args.config == Config::default_path() {
        Config::load_or_default(&args.config)?
    } else {
        Config::load(&args.config)?
    };
    if let Some(name) = args.model_name {
        config.model.name = name;
    }
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(protocol) = args.protocol {
        config.predictor.protocol = protocol;
    }
    if let Some(host) = args.predictor_host {
        config.predictor.set_endpoint(host);
    }
    config.validate().context("invalid configuration")?;

    info!("Configuration loaded:");
    info!("  Model: {} -> {}", config.model.name, config.model.remote_model);
    info!("  Predictor: {} ({})", config.predictor.endpoint(), config.predictor.protocol.as_str());
    info!("  HTTP port: {}", config.server.http_port);
    info!(
        "  Hedging: {:?}, fan_out {}, per-item timeout {}ms",
        config.hedging.mode, config.hedging.fan_out, config.hedging.per_item_timeout_ms
    );

    // Connect to the predictor; nothing is served without it
    let backend: Arc<dyn InferenceBackend> = match config.predictor.protocol {
        Protocol::Grpc => Arc::new(GrpcBackend::connect(&config.predictor).await?),
        Protocol::Http => Arc::new(HttpBackend::new(&config.predictor)?),
    };
    let gateway = InferenceGateway::connect(backend, &config.predictor)
        .await
        .context("inference server is not reachable")?;

    // Create quality service
    let service = Arc::new(QualityService::new(gateway.clone(), config.clone())?);

    let app_state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });
    let rest_router = create_rest_router(app_state);

    // Start REST server
    let addr = format!("0.0.0.0:{}", config.server.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("REST API listening on http://{}", addr);

    let _rest_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, rest_router).await {
            error!("REST server stopped: {}", e);
        }
    });

    info!("Face Quality Service is ready!");
    info!(
        "Predict: POST http://localhost:{}/v1/models/{}:predict",
        config.server.http_port, config.model.name
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    gateway.close();

    info!("Goodbye!");
    Ok(())
}
