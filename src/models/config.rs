use crate::utils::error::ServiceError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 当前支持的推理引擎
pub const SUPPORTED_ENGINE: &str = "onnx_detection";
pub const SUPPORTED_FRAMEWORK: &str = "onnx";
pub const SUPPORTED_TYPE: &str = "detection";

/// 模型目录中的 Config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 推理引擎名称
    pub inference_engine_name: String,

    /// 置信度阈值（百分比，0-100）
    pub confidence: f32,

    /// 最大返回预测数量
    pub predictions: usize,

    pub number_of_classes: usize,

    pub framework: String,

    #[serde(rename = "type")]
    pub model_type: String,

    /// 网络结构标记，仅用于展示
    #[serde(default)]
    pub network: String,
}

impl ModelConfig {
    /// 从文件读取并校验配置
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ModelConfig = serde_json::from_str(content)
            .map_err(|e| ServiceError::Config(format!("Malformed Config.json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inference_engine_name != SUPPORTED_ENGINE {
            return Err(ServiceError::Config(format!(
                "Unsupported inference engine '{}', expected '{}'",
                self.inference_engine_name, SUPPORTED_ENGINE
            )));
        }

        if !self.framework.eq_ignore_ascii_case(SUPPORTED_FRAMEWORK) {
            return Err(ServiceError::Config(format!(
                "Unsupported framework '{}', expected '{}'",
                self.framework, SUPPORTED_FRAMEWORK
            )));
        }

        if !self.model_type.eq_ignore_ascii_case(SUPPORTED_TYPE) {
            return Err(ServiceError::Config(format!(
                "Unsupported model type '{}', expected '{}'",
                self.model_type, SUPPORTED_TYPE
            )));
        }

        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(ServiceError::Config(format!(
                "Confidence must be between 0 and 100, got {}",
                self.confidence
            )));
        }

        if self.predictions == 0 {
            return Err(ServiceError::Config(
                "Predictions must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
