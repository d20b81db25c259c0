use crate::{
    detection::{DetectionResult, PredictionLimits},
    image::ResultFormatter,
    models::LoadedModel,
    utils::error::ServiceError,
    Result,
};
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use std::time::Instant;

/// 目标检测流水线
pub struct DetectionPipeline;

impl DetectionPipeline {
    /// 对单张图片执行检测
    pub async fn run(
        model: Arc<LoadedModel>,
        image: Arc<DynamicImage>,
        limits: PredictionLimits,
    ) -> Result<DetectionResult> {
        let start_time = Instant::now();
        let (width, height) = image.dimensions();

        // 推理是阻塞操作，放到阻塞线程池执行
        let raw = {
            let model = Arc::clone(&model);
            tokio::task::spawn_blocking(move || model.engine().detect(&image))
                .await
                .map_err(|e| ServiceError::Internal(format!("Inference task failed: {}", e)))??
        };

        let candidates = raw.len();
        let result = ResultFormatter::format_detections(raw, &model.labels, width, height, limits);

        tracing::info!(
            "Detection completed: model={}, candidates={}, returned={}, time={:.3}s",
            model.name,
            candidates,
            result.len(),
            start_time.elapsed().as_secs_f32()
        );

        Ok(result)
    }

    /// 批量检测，结果顺序与输入一致
    pub async fn run_batch(
        model: Arc<LoadedModel>,
        images: Vec<Arc<DynamicImage>>,
        limits: PredictionLimits,
    ) -> Result<Vec<DetectionResult>> {
        let mut results = Vec::with_capacity(images.len());

        for (i, image) in images.into_iter().enumerate() {
            tracing::debug!("Processing image {} of batch for model {}", i + 1, model.name);
            results.push(Self::run(Arc::clone(&model), image, limits).await?);
        }

        Ok(results)
    }
}
