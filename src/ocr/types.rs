use crate::detection::BoundingBox;
use serde::{Deserialize, Serialize};

/// 单段识别文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrText {
    /// 识别的文本内容
    pub text: String,
    /// 置信度（百分比）
    pub confidence: f32,
    /// 文本区域在原图中的位置
    pub bounding_box: BoundingBox,
    /// 一次性OCR中该区域对应的检测类别
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// 完整的OCR处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// 处理耗时（秒）
    pub processing_time: f32,
    /// 识别结果列表
    pub results: Vec<OcrText>,
}
