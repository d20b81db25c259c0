use crate::{
    detection::{DetectionPipeline, DetectionResult, PredictionLimits},
    image::{draw_detections, ImageLoader},
    models::{LoadOutcome, LoadedModel, ModelConfig},
    ocr::{OcrPipeline, OcrResult},
    web::{
        extractors::{RequestId, UploadForm, UploadedFile},
        AppState,
    },
    Result, ServiceError,
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn error(code: String, message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError { code, message }),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id.0;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelLoaded {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadQuery {
    /// 强制从磁盘重新加载
    #[serde(default)]
    pub force: bool,
}

/// 解码上传的图像（阻塞操作）
async fn decode_image(file: &UploadedFile, max_size: usize) -> Result<Arc<DynamicImage>> {
    tracing::debug!(
        "Decoding upload field '{}' ({}), {} bytes",
        file.field,
        file.file_name.as_deref().unwrap_or("unnamed"),
        file.data.len()
    );

    let data = file.data.clone();
    let image = tokio::task::spawn_blocking(move || ImageLoader::from_bytes(&data, max_size))
        .await
        .map_err(|e| {
            ServiceError::Internal(format!("Image decoding task failed: {}", e))
        })??;
    Ok(Arc::new(image))
}

/// 没有识别出任何文本时视为无效请求
fn require_text(result: OcrResult) -> Result<OcrResult> {
    if result.results.is_empty() {
        return Err(ServiceError::InvalidInput(
            "No text could be recognized in the image with the specified model".to_string(),
        ));
    }
    Ok(result)
}

/// 读取请求级的置信度与数量覆盖值
fn request_limits(model: &LoadedModel, form: &UploadForm) -> Result<PredictionLimits> {
    PredictionLimits::from_config(&model.config)
        .with_overrides(form.parse("confidence")?, form.parse("predictions")?)
}

/// 加载所有模型
pub async fn load_all_handler(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Result<Json<ApiResponse<BTreeMap<String, LoadOutcome>>>> {
    tracing::info!("Loading all models: request_id={}", request_id.0);

    let outcomes = state.registry.load_all().await?;
    let loaded = outcomes.values().filter(|o| o.success).count();

    tracing::info!("Loaded {}/{} models", loaded, outcomes.len());

    Ok(Json(ApiResponse::success(outcomes).with_request_id(request_id)))
}

/// 列出所有模型
pub async fn list_models_handler(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Result<Json<ApiResponse<ModelList>>> {
    let models = state.registry.list_models()?;
    Ok(Json(ApiResponse::success(ModelList { models }).with_request_id(request_id)))
}

/// 加载指定模型
pub async fn load_model_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    Query(query): Query<LoadQuery>,
) -> Result<Json<ApiResponse<ModelLoaded>>> {
    tracing::info!(
        "Loading model: request_id={}, model={}, force={}",
        request_id.0,
        name,
        query.force
    );

    let hash = state.registry.load_with(&name, query.force).await?;
    Ok(Json(
        ApiResponse::success(ModelLoaded { name, hash }).with_request_id(request_id),
    ))
}

/// 表单接口：按模型名称或哈希执行检测，直接返回检测列表
pub async fn detect_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    form: UploadForm,
) -> Result<Json<DetectionResult>> {
    let model_key = form.require("model")?;
    let model = state.registry.resolve(model_key)?;

    tracing::info!(
        "Processing detect request: request_id={}, model={}",
        request_id.0,
        model.name
    );

    let limits = request_limits(&model, &form)?;
    let image = decode_image(form.first_file()?, state.config.server_config.max_image_size).await?;
    let result = DetectionPipeline::run(model, image, limits).await?;

    Ok(Json(result))
}

/// 单张图片预测
pub async fn predict_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    form: UploadForm,
) -> Result<Json<ApiResponse<DetectionResult>>> {
    let model = state.registry.get(&name)?;
    tracing::info!("Processing predict request: request_id={}, model={}", request_id.0, name);

    let limits = request_limits(&model, &form)?;
    let image = decode_image(form.first_file()?, state.config.server_config.max_image_size).await?;
    let result = DetectionPipeline::run(model, image, limits).await?;

    Ok(Json(ApiResponse::success(result).with_request_id(request_id)))
}

/// 批量预测，结果顺序与上传顺序一致
pub async fn predict_batch_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    form: UploadForm,
) -> Result<Json<ApiResponse<Vec<DetectionResult>>>> {
    let model = state.registry.get(&name)?;
    let limits = request_limits(&model, &form)?;

    if form.files.is_empty() {
        return Err(ServiceError::InvalidInput(
            "No image files provided".to_string(),
        ));
    }

    tracing::info!(
        "Processing batch predict request: request_id={}, model={}, images={}",
        request_id.0,
        name,
        form.files.len()
    );

    let mut images = Vec::with_capacity(form.files.len());
    for file in &form.files {
        images.push(decode_image(file, state.config.server_config.max_image_size).await?);
    }

    let results = DetectionPipeline::run_batch(model, images, limits).await?;
    Ok(Json(ApiResponse::success(results).with_request_id(request_id)))
}

/// 返回绘制了检测框的图像
pub async fn predict_image_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    form: UploadForm,
) -> Result<Response> {
    let model = state.registry.get(&name)?;
    tracing::info!(
        "Processing predict_image request: request_id={}, model={}",
        request_id.0,
        name
    );

    let limits = request_limits(&model, &form)?;
    let image = decode_image(form.first_file()?, state.config.server_config.max_image_size).await?;
    let detections = DetectionPipeline::run(model, Arc::clone(&image), limits).await?;

    let jpeg = tokio::task::spawn_blocking(move || draw_detections(&image, &detections))
        .await
        .map_err(|e| ServiceError::Internal(format!("Drawing task failed: {}", e)))??;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

/// 表单接口：模型标签及其哈希
pub async fn get_labels_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    form: UploadForm,
) -> Result<Json<ApiResponse<BTreeMap<String, String>>>> {
    let model = state.registry.resolve(form.require("model")?)?;
    Ok(Json(
        ApiResponse::success(model.label_hashes()).with_request_id(request_id),
    ))
}

/// 模型标签列表（按类别ID排序）
pub async fn labels_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>> {
    let model = state.registry.get(&name)?;
    Ok(Json(
        ApiResponse::success(model.labels.names()).with_request_id(request_id),
    ))
}

/// 模型配置
pub async fn config_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ModelConfig>>> {
    let model = state.registry.get(&name)?;
    Ok(Json(
        ApiResponse::success(model.config.clone()).with_request_id(request_id),
    ))
}

/// 一次性OCR：先用路径中的模型检测区域，再逐个识别
pub async fn one_shot_ocr_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    form: UploadForm,
) -> Result<Json<ApiResponse<OcrResult>>> {
    let model = state.registry.get(&name)?;
    let recognizer = state.recognizer()?;

    tracing::info!(
        "Processing one-shot OCR request: request_id={}, model={}",
        request_id.0,
        name
    );

    let limits = request_limits(&model, &form)?;
    let image = decode_image(form.first_file()?, state.config.server_config.max_image_size).await?;
    let detections = DetectionPipeline::run(model, Arc::clone(&image), limits).await?;
    let result = OcrPipeline::recognize_regions(recognizer, image, &detections).await?;
    let result = require_text(result)?;

    Ok(Json(ApiResponse::success(result).with_request_id(request_id)))
}

/// 整页OCR：检测文本行后逐行识别
pub async fn ocr_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(name): Path<String>,
    form: UploadForm,
) -> Result<Json<ApiResponse<OcrResult>>> {
    // 模型名称同样需要先加载
    state.registry.get(&name)?;
    let recognizer = state.recognizer()?;

    tracing::info!("Processing OCR request: request_id={}, model={}", request_id.0, name);

    let image = decode_image(form.first_file()?, state.config.server_config.max_image_size).await?;
    let result =
        OcrPipeline::recognize_image(recognizer, state.line_detector.clone(), image).await?;
    let result = require_text(result)?;

    Ok(Json(ApiResponse::success(result).with_request_id(request_id)))
}
