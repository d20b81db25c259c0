use crate::detection::BoundingBox;
use crate::models::detector::{build_session, inference_error};
use crate::utils::error::ServiceError;
use crate::{Config, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{s, Array4, ArrayView2, Axis, Ix2};
use ort::{inputs, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;

/// 文本行检测接口：返回整页图像中每一行文字的像素框
pub trait TextLineDetector: Send + Sync {
    fn detect_lines(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>>;
}

/// DB 后处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbParams {
    /// 概率图二值化阈值
    pub thresh: f32,
    /// 文本框平均得分阈值
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub max_candidates: usize,
    /// 概率图上的最小边长
    pub min_size: f32,
    /// 输入最长边
    pub limit_side: u32,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            max_candidates: 1000,
            min_size: 3.0,
            limit_side: 960,
        }
    }
}

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 基于 DBNet 概率图的文本行检测模型
pub struct DbTextDetector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    params: DbParams,
}

impl DbTextDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let model_path = config.det_model_path().ok_or_else(|| {
            ServiceError::OcrUnavailable("No OCR model directory configured".to_string())
        })?;

        if !model_path.exists() {
            return Err(ServiceError::OcrUnavailable(format!(
                "Text detection model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading text detection model from: {}", model_path.display());

        let graph = fs::read(&model_path)?;
        let session = build_session(&graph, &config.onnx_config)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| {
                ServiceError::ModelLoad("Text detection model has no inputs".to_string())
            })?;

        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(ServiceError::ModelLoad(
                    "Text detection model has no outputs".to_string(),
                ))
            }
        };

        // 记录所有可用输出用于调试
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Text detection output[{}]: '{}'", i, output.name);
        }

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            params: DbParams::default(),
        })
    }

    /// 等比缩放到32的倍数，按ImageNet均值方差归一化，输出NCHW
    fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let (target_w, target_h) = scaled_size(width, height, self.params.limit_side);

        let resized =
            image::imageops::resize(&image.to_rgb8(), target_w, target_h, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, target_h as usize, target_w as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
            }
        }

        tensor
    }
}

impl TextLineDetector for DbTextDetector {
    fn detect_lines(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        let (width, height) = image.dimensions();
        let input_tensor = Tensor::from_array(self.preprocess(image)).map_err(inference_error)?;

        // 推理 - 在锁内提取数据避免生命周期冲突
        let prediction = {
            let mut session = self.session.lock();
            let outputs = session
                .run(inputs![self.input_name.as_str() => input_tensor])
                .map_err(inference_error)?;

            match outputs.get(self.output_name.as_str()) {
                Some(output) => output
                    .try_extract_array::<f32>()
                    .map_err(inference_error)?
                    .into_owned(),
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    return Err(ServiceError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )));
                }
            }
        };

        // 支持 (1, H, W) 和 (1, 1, H, W)
        if prediction.ndim() < 2 {
            return Err(ServiceError::Inference(format!(
                "Unsupported text detection output shape: {:?}",
                prediction.shape()
            )));
        }
        let mut view = prediction.view();
        while view.ndim() > 2 {
            view = view.index_axis_move(Axis(0), 0);
        }
        let prob_map = view.into_dimensionality::<Ix2>().map_err(inference_error)?;

        let boxes = text_line_boxes(&prob_map, &self.params, width, height);
        tracing::debug!("Detected {} text lines", boxes.len());
        Ok(boxes)
    }
}

/// 最长边不超过 `limit_side`，宽高取整到32的倍数
fn scaled_size(width: u32, height: u32, limit_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let ratio = (limit_side as f32 / longest).min(1.0);
    let round32 = |value: u32| -> u32 {
        let scaled = (value as f32 * ratio).round() as u32;
        (((scaled + 16) / 32) * 32).max(32)
    };
    (round32(width), round32(height))
}

/// DB 后处理：二值化概率图，按连通域取外接框，打分过滤后外扩并映射回原图
pub(crate) fn text_line_boxes(
    prob_map: &ArrayView2<f32>,
    params: &DbParams,
    width: u32,
    height: u32,
) -> Vec<BoundingBox> {
    let (map_h, map_w) = prob_map.dim();
    if map_h == 0 || map_w == 0 {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(map_w as u32, map_h as u32, |x, y| {
        if prob_map[[y as usize, x as usize]] > params.thresh {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labeled = connected_components(&mask, Connectivity::Eight, Luma([0]));

    // 每个连通域的外接矩形
    let mut regions: HashMap<u32, (u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        if label[0] == 0 {
            continue;
        }
        regions
            .entry(label[0])
            .and_modify(|(min_x, min_y, max_x, max_y)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
            })
            .or_insert((x, y, x, y));
    }

    let mut regions: Vec<(u32, u32, u32, u32)> = regions.into_values().collect();
    regions.sort_by_key(|&(min_x, min_y, _, _)| (min_y, min_x));
    regions.truncate(params.max_candidates);

    let scale_x = width as f32 / map_w as f32;
    let scale_y = height as f32 / map_h as f32;

    let mut boxes = Vec::new();
    for (min_x, min_y, max_x, max_y) in regions {
        let box_w = (max_x - min_x + 1) as f32;
        let box_h = (max_y - min_y + 1) as f32;
        if box_w.min(box_h) < params.min_size {
            continue;
        }

        let (rows, cols) = (
            min_y as usize..=max_y as usize,
            min_x as usize..=max_x as usize,
        );
        let score = prob_map.slice(s![rows, cols]).mean().unwrap_or(0.0);
        if score < params.box_thresh {
            continue;
        }

        // unclip：按面积/周长外扩
        let distance = box_w * box_h * params.unclip_ratio / (2.0 * (box_w + box_h));
        if (box_w + 2.0 * distance).min(box_h + 2.0 * distance) < params.min_size + 2.0 {
            continue;
        }

        let left = (min_x as f32 - distance) * scale_x;
        let top = (min_y as f32 - distance) * scale_y;
        let right = ((max_x + 1) as f32 + distance) * scale_x;
        let bottom = ((max_y + 1) as f32 + distance) * scale_y;

        let bbox = BoundingBox {
            left: left.floor().clamp(0.0, width as f32) as u32,
            top: top.floor().clamp(0.0, height as f32) as u32,
            right: right.ceil().clamp(0.0, width as f32) as u32,
            bottom: bottom.ceil().clamp(0.0, height as f32) as u32,
        };
        if !bbox.is_empty() {
            boxes.push(bbox);
        }
    }

    boxes
}
