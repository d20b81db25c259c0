use crate::models::ModelConfig;
use crate::utils::error::ServiceError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// 像素坐标的边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    /// 从归一化的 [ymin, xmin, ymax, xmax] 转换为像素坐标，并限制在图像范围内
    pub fn from_normalized(bbox: [f32; 4], width: u32, height: u32) -> Self {
        let scale = |value: f32, size: u32| -> u32 {
            let value = if value.is_finite() { value } else { 0.0 };
            (value.clamp(0.0, 1.0) * size as f32).round() as u32
        };

        let (top, bottom) = ordered(scale(bbox[0], height), scale(bbox[2], height));
        let (left, right) = ordered(scale(bbox[1], width), scale(bbox[3], width));

        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// 覆盖整张图像的边界框
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "ObjectClassName")]
    pub class_name: String,

    #[serde(rename = "ObjectClassId")]
    pub class_id: u32,

    /// 置信度（百分比）
    pub confidence: f32,

    #[serde(rename = "coordinates")]
    pub bbox: BoundingBox,
}

/// 单张图片的检测结果，按置信度降序
pub type DetectionResult = Vec<Detection>;

/// 一次请求生效的置信度阈值与最大预测数量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionLimits {
    /// 百分比
    pub confidence: f32,
    pub predictions: usize,
}

impl PredictionLimits {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            confidence: config.confidence,
            predictions: config.predictions,
        }
    }

    /// 应用请求级覆盖值
    ///
    /// 覆盖值只能收紧模型配置：阈值不低于配置值，数量不超过配置值。
    pub fn with_overrides(self, confidence: Option<f32>, predictions: Option<usize>) -> Result<Self> {
        let mut limits = self;

        if let Some(confidence) = confidence {
            if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
                return Err(ServiceError::InvalidInput(format!(
                    "confidence must be between 0 and 100, got {}",
                    confidence
                )));
            }
            limits.confidence = limits.confidence.max(confidence);
        }

        if let Some(predictions) = predictions {
            if predictions == 0 {
                return Err(ServiceError::InvalidInput(
                    "predictions must be at least 1".to_string(),
                ));
            }
            limits.predictions = limits.predictions.min(predictions);
        }

        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PredictionLimits {
        PredictionLimits {
            confidence: 60.0,
            predictions: 15,
        }
    }

    #[test]
    fn test_bbox_from_normalized() {
        let bbox = BoundingBox::from_normalized([0.25, 0.1, 0.75, 0.5], 200, 100);
        assert_eq!(
            bbox,
            BoundingBox {
                left: 20,
                top: 25,
                right: 100,
                bottom: 75
            }
        );
        assert_eq!(bbox.width(), 80);
        assert_eq!(bbox.height(), 50);
    }

    #[test]
    fn test_bbox_is_clamped_and_ordered() {
        let bbox = BoundingBox::from_normalized([1.2, 0.9, -0.5, f32::NAN], 100, 100);
        assert_eq!(bbox.top, 0);
        assert_eq!(bbox.bottom, 100);
        assert_eq!(bbox.left, 0);
        assert_eq!(bbox.right, 90);
    }

    #[test]
    fn test_detection_json_shape() {
        let detection = Detection {
            class_name: "cat".to_string(),
            class_id: 1,
            confidence: 97.5,
            bbox: BoundingBox::full(10, 20),
        };
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["ObjectClassName"], "cat");
        assert_eq!(value["ObjectClassId"], 1);
        assert_eq!(value["coordinates"]["bottom"], 20);
    }

    #[test]
    fn test_overrides_only_tighten() {
        let tightened = limits().with_overrides(Some(80.0), Some(5)).unwrap();
        assert_eq!(tightened.confidence, 80.0);
        assert_eq!(tightened.predictions, 5);

        let clamped = limits().with_overrides(Some(10.0), Some(100)).unwrap();
        assert_eq!(clamped, limits());

        assert_eq!(limits().with_overrides(None, None).unwrap(), limits());
    }

    #[test]
    fn test_invalid_overrides() {
        assert!(limits().with_overrides(Some(101.0), None).is_err());
        assert!(limits().with_overrides(Some(f32::NAN), None).is_err());
        assert!(limits().with_overrides(None, Some(0)).is_err());
    }
}
