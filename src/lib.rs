pub mod config;
pub mod detection;
pub mod image;
pub mod models;
pub mod ocr;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use detection::{Detection, DetectionResult};
pub use models::ModelRegistry;
pub use ocr::OcrResult;
pub use utils::error::ServiceError;

pub type Result<T> = std::result::Result<T, ServiceError>;
