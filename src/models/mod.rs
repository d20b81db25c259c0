pub mod config;
pub mod detector;
pub mod labels;
pub mod recognizer;
pub mod registry;
pub mod text_detector;

pub use config::ModelConfig;
pub use detector::{DetectionEngine, EngineFactory, OnnxEngineFactory, RawDetection};
pub use labels::LabelMap;
pub use recognizer::{CtcRecognizer, TextRecognizer};
pub use registry::{LoadOutcome, LoadedModel, ModelRegistry};
pub use text_detector::{DbParams, DbTextDetector, TextLineDetector};

/// 模型目录中的文件约定
pub const CONFIG_FILE: &str = "Config.json";
pub const GRAPH_FILE: &str = "frozen_inference_graph.onnx";
pub const LABEL_MAP_FILE: &str = "object-detection.pbtxt";
pub const LABEL_LIST_FILE: &str = "labels.txt";
