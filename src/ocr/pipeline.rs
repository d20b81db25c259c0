use crate::{
    detection::{BoundingBox, Detection},
    image::{ImageTransforms, ResultFormatter},
    models::{TextLineDetector, TextRecognizer},
    ocr::{OcrResult, OcrText},
    utils::error::ServiceError,
    Result,
};
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use std::time::Instant;

/// OCR处理流水线
pub struct OcrPipeline;

impl OcrPipeline {
    /// 整页OCR：先检测文本行，再逐行识别
    ///
    /// 未配置文本行检测模型时，整张图像作为单个区域交给识别器。
    pub async fn recognize_image(
        recognizer: Arc<dyn TextRecognizer>,
        line_detector: Option<Arc<dyn TextLineDetector>>,
        image: Arc<DynamicImage>,
    ) -> Result<OcrResult> {
        let start_time = Instant::now();
        let (width, height) = image.dimensions();

        let lines = match line_detector {
            Some(detector) => {
                let image = Arc::clone(&image);
                tokio::task::spawn_blocking(move || detector.detect_lines(&image))
                    .await
                    .map_err(|e| {
                        ServiceError::Internal(format!("Text detection task failed: {}", e))
                    })??
            }
            None => vec![BoundingBox::full(width, height)],
        };

        let mut crops = Vec::with_capacity(lines.len());
        let mut regions = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(crop) = ImageTransforms::crop(&image, &line) {
                crops.push(crop);
                regions.push((line, None));
            }
        }

        let texts = if crops.is_empty() {
            Vec::new()
        } else {
            Self::recognize_crops(recognizer, crops, regions).await?
        };

        let result = ResultFormatter::format_ocr(texts, start_time.elapsed().as_secs_f32());
        tracing::info!(
            "OCR completed: texts={}, time={:.3}s",
            result.results.len(),
            result.processing_time
        );
        Ok(result)
    }

    /// 一次性OCR：按检测框裁剪后逐个识别
    pub async fn recognize_regions(
        recognizer: Arc<dyn TextRecognizer>,
        image: Arc<DynamicImage>,
        detections: &[Detection],
    ) -> Result<OcrResult> {
        let start_time = Instant::now();

        let mut crops = Vec::with_capacity(detections.len());
        let mut regions = Vec::with_capacity(detections.len());

        // 文字区域裁剪
        for detection in detections {
            match ImageTransforms::crop(&image, &detection.bbox) {
                Some(crop) => {
                    crops.push(crop);
                    regions.push((detection.bbox, Some(detection.class_name.clone())));
                }
                None => tracing::warn!(
                    "Skipping empty region {:?} for class '{}'",
                    detection.bbox,
                    detection.class_name
                ),
            }
        }

        let texts = if crops.is_empty() {
            Vec::new()
        } else {
            Self::recognize_crops(recognizer, crops, regions).await?
        };

        let result = ResultFormatter::format_ocr(texts, start_time.elapsed().as_secs_f32());
        tracing::info!(
            "One-shot OCR completed: regions={}, texts={}, time={:.3}s",
            detections.len(),
            result.results.len(),
            result.processing_time
        );
        Ok(result)
    }

    /// 在阻塞线程池中执行识别，并与区域信息对应
    async fn recognize_crops(
        recognizer: Arc<dyn TextRecognizer>,
        crops: Vec<DynamicImage>,
        regions: Vec<(BoundingBox, Option<String>)>,
    ) -> Result<Vec<OcrText>> {
        let expected = crops.len();
        let recognized = tokio::task::spawn_blocking(move || recognizer.recognize_text(&crops))
            .await
            .map_err(|e| ServiceError::Internal(format!("Recognition task failed: {}", e)))??;

        if recognized.len() != expected {
            return Err(ServiceError::Inference(format!(
                "Recognizer returned {} results for {} regions",
                recognized.len(),
                expected
            )));
        }

        Ok(recognized
            .into_iter()
            .zip(regions)
            .map(|((text, confidence), (bounding_box, label))| OcrText {
                text,
                confidence: confidence * 100.0,
                bounding_box,
                label,
            })
            .collect())
    }
}
