//! Quality Service - request pipeline
//!
//! Resolves and normalizes the referenced images, runs the configured
//! dispatch mode against the predictor and shapes the scores into the
//! response envelope.

use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::api::dto::{MultiResponse, RequestEnvelope, Response};
use crate::config::{Config, InferMode};
use crate::engine::{
    AggregatedResult, BatchCoordinator, ImageNormalizer, InferenceGateway, QualityPredictor,
};
use crate::error::{Error, Result};

use super::types::{HealthResult, PreparedRequest};

/// Face quality scoring service
pub struct QualityService {
    gateway: InferenceGateway,
    coordinator: BatchCoordinator,
    normalizer: ImageNormalizer,
    config: Config,
}

impl QualityService {
    pub fn new(gateway: InferenceGateway, config: Config) -> Result<Self> {
        let predictor = QualityPredictor::new(&config.model);
        let coordinator = BatchCoordinator::new(gateway.clone(), predictor);
        let normalizer = ImageNormalizer::new(config.model.input_size)?;

        Ok(Self {
            gateway,
            coordinator,
            normalizer,
            config,
        })
    }

    /// Name this service is routed under
    pub fn model_name(&self) -> &str {
        &self.config.model.name
    }

    pub fn gateway(&self) -> &InferenceGateway {
        &self.gateway
    }

    /// Resolve every referenced image and stack them into one batch
    pub async fn preprocess(&self, request: &RequestEnvelope) -> Result<PreparedRequest> {
        let start = Instant::now();
        let items = request.items();
        if items.is_empty() {
            return Err(Error::invalid_input("request contains no image items"));
        }

        let fetch_timeout = self.config.images.fetch_timeout();
        let mut images: Vec<DynamicImage> = Vec::with_capacity(items.len());
        for item in items {
            let image = match tokio::time::timeout(fetch_timeout, self.normalizer.resolve(item)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::ImageLoad {
                        location: short_reference(item),
                        reason: format!("timed out after {:?}", fetch_timeout),
                    })
                }
            };
            images.push(image);
        }

        let normalizer = self.normalizer.clone();
        let batch = tokio::task::spawn_blocking(move || normalizer.normalize_batch(&images))
            .await
            .map_err(|e| Error::Internal(format!("normalization task failed: {}", e)))??;

        let metadata = request.metadata();
        if !metadata.is_empty() {
            debug!("Request metadata: {:?}", metadata);
        }

        info!(
            "Preprocessed {} images ({} request) in {}ms",
            batch.shape()[0],
            if request.is_multi() { "batch" } else { "single" },
            start.elapsed().as_millis()
        );

        Ok(PreparedRequest { batch, metadata })
    }

    /// Score the batch with the configured dispatch mode
    pub async fn predict(&self, prepared: &PreparedRequest) -> AggregatedResult {
        let start = Instant::now();
        let hedging = &self.config.hedging;
        let job = self.coordinator.predictor().job(&prepared.batch);

        let result = match hedging.mode {
            InferMode::Sync => self.coordinator.run_sync(job).await,
            InferMode::Future => {
                self.coordinator
                    .run_futures(job, hedging.fan_out, hedging.per_item_timeout())
                    .await
            }
            InferMode::Callback => {
                self.coordinator
                    .run(job, hedging.fan_out, hedging.per_item_timeout())
                    .await
            }
        };

        if result.is_empty() {
            warn!(
                "No successful prediction for {} images ({} received, {} failed)",
                prepared.image_count(),
                result.received,
                result.failures
            );
        }
        info!(
            "Predicted {} images in {}ms",
            prepared.image_count(),
            start.elapsed().as_millis()
        );

        result
    }

    /// One record per score, in input order
    pub fn postprocess(&self, result: &AggregatedResult) -> MultiResponse {
        MultiResponse {
            multi_data: result.scores.iter().map(|&s| Response::score(s)).collect(),
        }
    }

    /// Full pipeline for one request
    pub async fn handle(&self, request: &RequestEnvelope) -> Result<MultiResponse> {
        let start = Instant::now();

        let prepared = self.preprocess(request).await?;
        let result = self.predict(&prepared).await;
        let response = self.postprocess(&result);

        info!(
            "Request for {} images answered with {} scores in {}ms",
            prepared.image_count(),
            response.multi_data.len(),
            start.elapsed().as_millis()
        );

        Ok(response)
    }

    pub async fn health(&self) -> HealthResult {
        let ready = self.gateway.is_ready().await;
        let status = self.gateway.status();

        HealthResult {
            model: self.config.model.name.clone(),
            predictor: status.endpoint,
            ready,
            reconnects: status.reconnects,
            late_arrivals: self.coordinator.late_arrivals(),
            last_error: status.last_error,
        }
    }
}

/// Reference label for errors; inline payloads are elided
fn short_reference(item: &str) -> String {
    if item.starts_with("data") {
        format!("inline image ({} chars)", item.len())
    } else {
        item.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use base64::Engine;
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::json;

    use crate::client::testing::{ScriptedBackend, Step};

    fn data_url(width: u32, height: u32) -> String {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 90])
        }));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(buffer.into_inner());
        format!("data:image/png;base64,{}", encoded)
    }

    async fn service(backend: Arc<ScriptedBackend>, mode: InferMode, fan_out: usize) -> QualityService {
        let mut config = Config::default();
        config.hedging.mode = mode;
        config.hedging.fan_out = fan_out;
        config.hedging.per_item_timeout_ms = 200;
        let gateway = InferenceGateway::connect(backend, &config.predictor)
            .await
            .unwrap();
        QualityService::new(gateway, config).unwrap()
    }

    fn multi(items: Vec<String>) -> RequestEnvelope {
        serde_json::from_value(json!({
            "multi_data": items
                .into_iter()
                .map(|item| json!({"data": {"item": item}}))
                .collect::<Vec<_>>(),
            "extra_info": {"others": {"video_id": "v1"}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_preprocess_shapes_batch() {
        let svc = service(Arc::new(ScriptedBackend::new(vec![])), InferMode::Callback, 1).await;
        let request = multi(vec![data_url(64, 48), data_url(300, 200)]);

        let prepared = svc.preprocess(&request).await.unwrap();
        assert_eq!(prepared.batch.shape(), &[2, 3, 112, 112]);
        assert_eq!(prepared.metadata["video_id"], json!("v1"));
    }

    #[tokio::test]
    async fn test_preprocess_rejects_empty_and_bad_items() {
        let svc = service(Arc::new(ScriptedBackend::new(vec![])), InferMode::Callback, 1).await;

        let empty: RequestEnvelope = serde_json::from_value(json!({"multi_data": []})).unwrap();
        assert!(matches!(svc.preprocess(&empty).await, Err(Error::InvalidInput(_))));

        let bad = multi(vec!["ftp://host/a.jpg".to_string()]);
        assert!(matches!(svc.preprocess(&bad).await, Err(Error::InvalidInput(_))));

        let missing = multi(vec!["path:/definitely/not/here.png".to_string()]);
        assert!(matches!(svc.preprocess(&missing).await, Err(Error::ImageLoad { .. })));
    }

    #[tokio::test]
    async fn test_handle_callback_mode() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(5, vec![0.87]),
            Step::ok(10, vec![0.87]),
            Step::fail(15, "deadline exceeded"),
        ]));
        let svc = service(backend, InferMode::Callback, 3).await;

        let request: RequestEnvelope =
            serde_json::from_value(json!({"data": {"item": data_url(32, 32)}})).unwrap();
        let response = svc.handle(&request).await.unwrap();

        assert_eq!(response.multi_data, vec![Response::score(0.87)]);
    }

    #[tokio::test]
    async fn test_handle_keeps_input_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let svc = service(backend, InferMode::Future, 2).await;

        let items = (0..4).map(|i| data_url(20 + i, 20)).collect();
        let response = svc.handle(&multi(items)).await.unwrap();

        // the scripted echo reply scores image i as i / 100
        let scores: Vec<f32> = response
            .multi_data
            .iter()
            .map(|r| r.data[0].score)
            .collect();
        assert_eq!(scores, vec![0.0, 0.01, 0.02, 0.03]);
    }

    #[tokio::test]
    async fn test_all_failed_is_empty_not_error() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![]).with_fallback(Step::fail(1, "model error")),
        );
        let svc = service(backend, InferMode::Sync, 1).await;

        let response = svc.handle(&multi(vec![data_url(16, 16)])).await.unwrap();
        assert!(response.multi_data.is_empty());
    }

    #[tokio::test]
    async fn test_lost_predictor_yields_empty_responses() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::unavailable(); 3]));
        let svc = service(backend.clone(), InferMode::Callback, 3).await;
        backend.set_ready(false);

        let response = svc.handle(&multi(vec![data_url(16, 16)])).await.unwrap();
        assert!(response.multi_data.is_empty());

        // every hedge now fails its re-probe; still not an error
        let response = svc.handle(&multi(vec![data_url(16, 16)])).await.unwrap();
        assert!(response.multi_data.is_empty());
        assert!(!svc.gateway().status().ready);

        backend.set_ready(true);
        let response = svc.handle(&multi(vec![data_url(16, 16)])).await.unwrap();
        assert_eq!(response.multi_data.len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let svc = service(Arc::new(ScriptedBackend::new(vec![])), InferMode::Sync, 1).await;
        let health = svc.health().await;
        assert_eq!(health.model, "model");
        assert_eq!(health.predictor, "scripted:0");
        assert!(health.ready);
        assert_eq!(health.late_arrivals, 0);
    }
}
