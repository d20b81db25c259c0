use crate::models::detector::{build_session, inference_error};
use crate::utils::error::ServiceError;
use crate::{Config, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array3, ArrayViewD, Axis};
use ort::{inputs, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::fs;

/// 文字识别接口：每个输入图像返回 (文本, 置信度)
pub trait TextRecognizer: Send + Sync {
    fn recognize_text(&self, images: &[DynamicImage]) -> Result<Vec<(String, f32)>>;
}

/// 基于 CTC 解码的单行文字识别模型
pub struct CtcRecognizer {
    session: Mutex<Session>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    input_size: (usize, usize, usize), // (C, H, W)
    dict: Vec<String>,
}

impl CtcRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let (model_path, dict_path) = match (config.rec_model_path(), config.dict_path()) {
            (Some(model), Some(dict)) => (model, dict),
            _ => {
                return Err(ServiceError::OcrUnavailable(
                    "No OCR model directory configured".to_string(),
                ))
            }
        };

        if !model_path.exists() {
            return Err(ServiceError::OcrUnavailable(format!(
                "Recognition model not found: {}",
                model_path.display()
            )));
        }

        if !dict_path.exists() {
            return Err(ServiceError::OcrUnavailable(format!(
                "Dictionary file not found: {}",
                dict_path.display()
            )));
        }

        tracing::info!("Loading recognition model from: {}", model_path.display());
        tracing::info!("Loading dictionary from: {}", dict_path.display());

        let graph = fs::read(&model_path)?;
        let session = build_session(&graph, &config.onnx_config)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| ServiceError::ModelLoad("Recognition model has no inputs".to_string()))?;

        // 动态发现输出名称
        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(ServiceError::ModelLoad(
                    "Recognition model has no outputs".to_string(),
                ))
            }
        };
        tracing::info!("Recognition model output: '{}'", output_name);

        let dict_content = fs::read_to_string(&dict_path)?;
        let dict = build_dictionary(&dict_content);

        tracing::info!("Loaded dictionary with {} characters (including blank)", dict.len());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size: (3, 48, 320),
            dict,
        })
    }

    fn recognize_single(&self, image: &DynamicImage) -> Result<(String, f32)> {
        let input_tensor = self.preprocess(image).insert_axis(Axis(0));
        let input_tensor = Tensor::from_array(input_tensor).map_err(inference_error)?;

        let predictions = {
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

        ctc_decode(&predictions.view(), &self.dict)
    }

    /// 等比缩放到固定高度，归一化到[-1, 1]，右侧补零
    fn preprocess(&self, image: &DynamicImage) -> Array3<f32> {
        let (channels, target_h, target_w) = self.input_size;
        let rgb = image.to_rgb8();
        let (orig_w, orig_h) = rgb.dimensions();

        let ratio = orig_w as f32 / orig_h.max(1) as f32;
        let resized_w = ((target_h as f32 * ratio).ceil() as usize).clamp(1, target_w);

        let resized = image::imageops::resize(
            &rgb,
            resized_w as u32,
            target_h as u32,
            FilterType::Triangle,
        );

        let mut padded = Array3::<f32>::zeros((channels, target_h, target_w));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..channels {
                padded[[c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }

        padded
    }
}

impl TextRecognizer for CtcRecognizer {
    fn recognize_text(&self, images: &[DynamicImage]) -> Result<Vec<(String, f32)>> {
        let mut results = Vec::with_capacity(images.len());
        for image in images {
            results.push(self.recognize_single(image)?);
        }
        Ok(results)
    }
}

/// 构建字典：开头是CTC的blank，末尾追加空格
fn build_dictionary(content: &str) -> Vec<String> {
    let mut dict = vec!["blank".to_string()];
    dict.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    dict.push(" ".to_string());
    dict
}

/// CTC贪心解码，返回文本和平均置信度
fn ctc_decode(predictions: &ArrayViewD<f32>, dict: &[String]) -> Result<(String, f32)> {
    let shape = predictions.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(ServiceError::Inference(format!(
            "Expected prediction tensor [1, T, C], got {:?}",
            shape
        )));
    }

    let (seq_len, vocab_size) = (shape[1], shape[2]);
    if vocab_size != dict.len() {
        tracing::warn!("Model vocab size ({}) != dict size ({})", vocab_size, dict.len());
    }

    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous: Option<usize> = None;

    for t in 0..seq_len {
        let mut max_prob = f32::NEG_INFINITY;
        let mut max_idx = 0;
        for c in 0..vocab_size {
            let prob = predictions[[0, t, c]];
            if prob > max_prob {
                max_prob = prob;
                max_idx = c;
            }
        }

        // 忽略blank和连续重复
        if max_idx != 0 && previous != Some(max_idx) {
            match dict.get(max_idx) {
                Some(character) => {
                    text.push_str(character);
                    confidences.push(max_prob);
                }
                None => tracing::warn!(
                    "Character index {} out of dictionary bounds ({})",
                    max_idx,
                    dict.len()
                ),
            }
        }
        previous = Some(max_idx);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    Ok((text, confidence))
}
