use crate::web::handlers::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    #[error("Invalid model configuration: {0}")]
    Config(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("OCR is not available: {0}")]
    OcrUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotLoaded(_) => StatusCode::CONFLICT,
            ServiceError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::ImageDecode(_) => StatusCode::BAD_REQUEST,
            ServiceError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::OcrUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "MODEL_NOT_FOUND",
            ServiceError::NotLoaded(_) => "MODEL_NOT_LOADED",
            ServiceError::Config(_) => "CONFIG_ERROR",
            ServiceError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            ServiceError::Inference(_) => "INFERENCE_ERROR",
            ServiceError::OcrUnavailable(_) => "OCR_UNAVAILABLE",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            ServiceError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ServiceError::Io(_) => "IO_ERROR",
            ServiceError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 客户端错误只记录warn，服务端错误记录error
        if status.is_server_error() {
            tracing::error!("Request failed: {} ({})", self, status);
        } else {
            tracing::warn!("Request rejected: {} ({})", self, status);
        }

        let body = ApiResponse::<()>::error(self.error_code().to_string(), self.to_string());

        (status, axum::Json(body)).into_response()
    }
}
