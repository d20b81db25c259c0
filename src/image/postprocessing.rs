use crate::detection::{BoundingBox, Detection, DetectionResult, PredictionLimits};
use crate::models::{LabelMap, RawDetection};
use crate::ocr::{OcrResult, OcrText};

/// 同一行文本的纵向容差（像素）
const LINE_TOLERANCE: f32 = 10.0;

/// 结果格式化器
pub struct ResultFormatter;

impl ResultFormatter {
    /// 格式化检测结果：转换为百分比和像素坐标，按阈值过滤，按置信度降序截断
    pub fn format_detections(
        raw: Vec<RawDetection>,
        labels: &LabelMap,
        width: u32,
        height: u32,
        limits: PredictionLimits,
    ) -> DetectionResult {
        let mut detections: Vec<Detection> = raw
            .into_iter()
            .map(|candidate| (candidate.score * 100.0, candidate))
            .filter(|(confidence, _)| confidence.is_finite() && *confidence >= limits.confidence)
            .map(|(confidence, candidate)| Detection {
                class_name: labels
                    .name(candidate.class_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| candidate.class_id.to_string()),
                class_id: candidate.class_id,
                confidence,
                bbox: BoundingBox::from_normalized(candidate.bbox, width, height),
            })
            .collect();

        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(limits.predictions);
        detections
    }

    /// 格式化OCR结果，丢弃空文本并按阅读顺序排序（从上到下，从左到右）
    pub fn format_ocr(texts: Vec<OcrText>, processing_time: f32) -> OcrResult {
        let mut results: Vec<OcrText> = texts
            .into_iter()
            .filter(|text| !text.text.trim().is_empty())
            .collect();

        results.sort_by(|a, b| {
            let a_center_y = (a.bounding_box.top + a.bounding_box.bottom) as f32 / 2.0;
            let b_center_y = (b.bounding_box.top + b.bounding_box.bottom) as f32 / 2.0;

            if (a_center_y - b_center_y).abs() < LINE_TOLERANCE {
                // 同一行的文本
                let a_center_x = (a.bounding_box.left + a.bounding_box.right) as f32 / 2.0;
                let b_center_x = (b.bounding_box.left + b.bounding_box.right) as f32 / 2.0;
                a_center_x.total_cmp(&b_center_x)
            } else {
                a_center_y.total_cmp(&b_center_y)
            }
        });

        OcrResult {
            processing_time,
            results,
        }
    }
}
