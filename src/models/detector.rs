use crate::config::OnnxConfig;
use crate::models::config::ModelConfig;
use crate::utils::error::ServiceError;
use crate::Result;
use image::DynamicImage;
use ndarray::{Array4, ArrayD, ArrayViewD};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// 推理引擎输出的原始检测框
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    /// 分数 (0.0 - 1.0)
    pub score: f32,
    /// 归一化坐标 [ymin, xmin, ymax, xmax]
    pub bbox: [f32; 4],
}

/// 目标检测推理接口，已加载的模型对其只读共享
pub trait DetectionEngine: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>>;
}

/// 从冻结图构建推理引擎
pub trait EngineFactory: Send + Sync {
    fn build(&self, graph: &[u8], config: &ModelConfig) -> Result<Arc<dyn DetectionEngine>>;
}

/// 基于 ONNX Runtime 的引擎工厂
pub struct OnnxEngineFactory {
    onnx_config: OnnxConfig,
}

impl OnnxEngineFactory {
    pub fn new(onnx_config: OnnxConfig) -> Self {
        Self { onnx_config }
    }
}

impl EngineFactory for OnnxEngineFactory {
    fn build(&self, graph: &[u8], config: &ModelConfig) -> Result<Arc<dyn DetectionEngine>> {
        let detector = OnnxDetector::from_memory(graph, &self.onnx_config)?;
        tracing::debug!(
            "Built ONNX detector for network '{}' ({} classes)",
            config.network,
            config.number_of_classes
        );
        Ok(Arc::new(detector))
    }
}

/// TF object-detection 导出约定的 ONNX 检测器
///
/// 输入 `uint8 [1, H, W, 3]`，输出 `detection_boxes`、`detection_scores`、
/// `detection_classes`，以及可选的 `num_detections`。
pub struct OnnxDetector {
    session: Mutex<Session>,
    input_name: String,
    outputs: OutputNames,
}

#[derive(Debug, Clone, PartialEq)]
struct OutputNames {
    boxes: String,
    scores: String,
    classes: String,
    count: Option<String>,
}

impl OutputNames {
    /// 根据名称动态发现输出
    fn discover(names: &[String]) -> Result<Self> {
        let find = |needle: &str| names.iter().find(|name| name.contains(needle)).cloned();

        let missing = |what: &str| {
            ServiceError::ModelLoad(format!(
                "Detection graph has no '{}' output. Available outputs: {:?}",
                what, names
            ))
        };

        Ok(Self {
            boxes: find("detection_boxes").ok_or_else(|| missing("detection_boxes"))?,
            scores: find("detection_scores").ok_or_else(|| missing("detection_scores"))?,
            classes: find("detection_classes").ok_or_else(|| missing("detection_classes"))?,
            count: find("num_detections"),
        })
    }
}

pub(crate) fn load_error<E: std::fmt::Display>(e: E) -> ServiceError {
    ServiceError::ModelLoad(e.to_string())
}

pub(crate) fn inference_error<E: std::fmt::Display>(e: E) -> ServiceError {
    ServiceError::Inference(e.to_string())
}

fn optimization_level(level: i32) -> GraphOptimizationLevel {
    match level {
        i32::MIN..=0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// 按照配置创建 ONNX 会话
pub(crate) fn build_session(graph: &[u8], onnx_config: &OnnxConfig) -> Result<Session> {
    Session::builder()
        .map_err(load_error)?
        .with_optimization_level(optimization_level(onnx_config.optimization_level))
        .map_err(load_error)?
        .with_intra_threads(onnx_config.intra_threads)
        .map_err(load_error)?
        .commit_from_memory(graph)
        .map_err(load_error)
}

impl OnnxDetector {
    pub fn from_memory(graph: &[u8], onnx_config: &OnnxConfig) -> Result<Self> {
        let session = build_session(graph, onnx_config)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| ServiceError::ModelLoad("Detection graph has no inputs".to_string()))?;

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        for (i, name) in output_names.iter().enumerate() {
            tracing::debug!("Detection output[{}]: '{}'", i, name);
        }
        let outputs = OutputNames::discover(&output_names)?;

        tracing::info!(
            "Detection graph input '{}', outputs boxes='{}' scores='{}' classes='{}'",
            input_name,
            outputs.boxes,
            outputs.scores,
            outputs.classes
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            outputs,
        })
    }

    /// 图像转换为 NHWC uint8 张量
    fn to_input(image: &DynamicImage) -> Result<Array4<u8>> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Array4::from_shape_vec((1, height as usize, width as usize, 3), rgb.into_raw())
            .map_err(|e| ServiceError::Inference(format!("Failed to build input tensor: {}", e)))
    }
}

impl DetectionEngine for OnnxDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let input_tensor = Tensor::from_array(Self::to_input(image)?).map_err(inference_error)?;

        let required = [&self.outputs.boxes, &self.outputs.scores, &self.outputs.classes];

        // 推理 - 在锁内提取数据避免生命周期冲突
        let (mut extracted, count) = {
            let mut session = self.session.lock();
            let outputs = session
                .run(inputs![self.input_name.as_str() => input_tensor])
                .map_err(inference_error)?;

            let mut extracted: Vec<ArrayD<f32>> = Vec::with_capacity(required.len());
            for name in required {
                match outputs.get(name.as_str()) {
                    Some(output) => extracted.push(
                        output
                            .try_extract_array::<f32>()
                            .map_err(inference_error)?
                            .into_owned(),
                    ),
                    None => {
                        let available: Vec<String> =
                            outputs.keys().map(|s| s.to_string()).collect();
                        return Err(ServiceError::Inference(format!(
                            "Output '{}' not found. Available outputs: {:?}",
                            name, available
                        )));
                    }
                }
            }

            let count = match self.outputs.count.as_deref().and_then(|name| outputs.get(name)) {
                Some(output) => output
                    .try_extract_array::<f32>()
                    .map_err(inference_error)?
                    .iter()
                    .next()
                    .map(|n| *n as usize),
                None => None,
            };

            (extracted, count)
        };

        let classes = extracted.pop();
        let scores = extracted.pop();
        let boxes = extracted.pop();
        match (boxes, scores, classes) {
            (Some(boxes), Some(scores), Some(classes)) => {
                decode_outputs(&boxes.view(), &scores.view(), &classes.view(), count)
            }
            _ => Err(ServiceError::Inference("Incomplete detection outputs".to_string())),
        }
    }
}

/// 将输出张量解码为检测框列表
pub(crate) fn decode_outputs(
    boxes: &ArrayViewD<f32>,
    scores: &ArrayViewD<f32>,
    classes: &ArrayViewD<f32>,
    count: Option<usize>,
) -> Result<Vec<RawDetection>> {
    let box_shape = boxes.shape();
    if box_shape.len() != 3 || box_shape[0] != 1 || box_shape[2] != 4 {
        return Err(ServiceError::Inference(format!(
            "Unexpected detection_boxes shape: {:?}, expected [1, N, 4]",
            box_shape
        )));
    }

    let candidates = box_shape[1];
    if scores.shape() != [1, candidates] || classes.shape() != [1, candidates] {
        return Err(ServiceError::Inference(format!(
            "Mismatched output shapes: boxes {:?}, scores {:?}, classes {:?}",
            box_shape,
            scores.shape(),
            classes.shape()
        )));
    }

    let total = count.map_or(candidates, |n| n.min(candidates));
    let mut detections = Vec::with_capacity(total);

    for i in 0..total {
        let score = scores[[0, i]];
        if !score.is_finite() {
            continue;
        }

        let class = classes[[0, i]];
        if !class.is_finite() || class < 0.0 {
            continue;
        }

        detections.push(RawDetection {
            class_id: class.round() as u32,
            score,
            bbox: [
                boxes[[0, i, 0]],
                boxes[[0, i, 1]],
                boxes[[0, i, 2]],
                boxes[[0, i, 3]],
            ],
        });
    }

    tracing::debug!("Decoded {} raw detections from {} candidates", detections.len(), candidates);
    Ok(detections)
}
