pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    models::{
        CtcRecognizer, DbTextDetector, EngineFactory, ModelRegistry, OnnxEngineFactory,
        TextLineDetector, TextRecognizer,
    },
    utils::error::ServiceError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub recognizer: Option<Arc<dyn TextRecognizer>>,
    pub line_detector: Option<Arc<dyn TextLineDetector>>,
}

impl AppState {
    pub fn new(
        config: Config,
        factory: Arc<dyn EngineFactory>,
        recognizer: Option<Arc<dyn TextRecognizer>>,
    ) -> Self {
        let registry = ModelRegistry::new(config.models_dir.clone(), factory);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            recognizer,
            line_detector: None,
        }
    }

    /// 整页OCR使用的文本行检测器
    pub fn with_line_detector(mut self, line_detector: Arc<dyn TextLineDetector>) -> Self {
        self.line_detector = Some(line_detector);
        self
    }

    /// 使用ONNX Runtime后端创建状态；OCR模型缺失时仅禁用OCR接口
    pub fn from_config(config: Config) -> Self {
        let factory = Arc::new(OnnxEngineFactory::new(config.onnx_config.clone()));

        let recognizer: Option<Arc<dyn TextRecognizer>> = if config.has_ocr_models() {
            match CtcRecognizer::new(&config) {
                Ok(recognizer) => Some(Arc::new(recognizer)),
                Err(e) => {
                    tracing::warn!("OCR recognizer unavailable: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("No OCR models configured, OCR endpoints disabled");
            None
        };

        let line_detector: Option<Arc<dyn TextLineDetector>> = if recognizer.is_some() {
            match DbTextDetector::new(&config) {
                Ok(detector) => Some(Arc::new(detector)),
                Err(e) => {
                    tracing::warn!("Text line detection unavailable, OCR reads whole images: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let state = Self::new(config, factory, recognizer);
        match line_detector {
            Some(detector) => state.with_line_detector(detector),
            None => state,
        }
    }

    pub fn recognizer(&self) -> Result<Arc<dyn TextRecognizer>> {
        self.recognizer.clone().ok_or_else(|| {
            ServiceError::OcrUnavailable("no text recognition model is configured".to_string())
        })
    }
}

pub async fn serve(config: Config) -> Result<()> {
    // 解析绑定地址
    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        ServiceError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    let state = AppState::from_config(config);

    if state.config.preload {
        let outcomes = state.registry.load_all().await?;
        let loaded = outcomes.values().filter(|o| o.success).count();
        tracing::info!("Preloaded {}/{} models", loaded, outcomes.len());
    }

    let app = create_app(state);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /load                          - Load all models");
    tracing::info!("  GET  /models                        - List models");
    tracing::info!("  GET  /models/{{name}}/load            - Load one model");
    tracing::info!("  POST /detect                        - Detect (form: model, image)");
    tracing::info!("  POST /models/{{name}}/predict         - Detect on one image");
    tracing::info!("  POST /models/{{name}}/predict_batch   - Detect on several images");
    tracing::info!("  POST /models/{{name}}/predict_image   - Annotated JPEG");
    tracing::info!("  POST /get_labels                    - Label hashes (form: model)");
    tracing::info!("  GET  /models/{{name}}/labels          - Label names");
    tracing::info!("  GET  /models/{{name}}/config          - Model config");
    tracing::info!("  POST /models/{{name}}/one_shot_ocr    - Detect then recognize");
    tracing::info!("  POST /models/{{name}}/ocr             - Recognize whole image");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  GET  /api/info                      - Service information");

    // 启动服务器
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        ServiceError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServiceError::Internal(format!("Server failed: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server_config = state.config.server_config.clone();

    Router::new()
        // 模型管理
        .route("/load", get(handlers::load_all_handler))
        .route("/models", get(handlers::list_models_handler))
        .route("/models/:name/load", get(handlers::load_model_handler))
        // 检测
        .route("/detect", post(handlers::detect_handler))
        .route("/models/:name/predict", post(handlers::predict_handler))
        .route("/models/:name/predict_batch", post(handlers::predict_batch_handler))
        .route("/models/:name/predict_image", post(handlers::predict_image_handler))
        // 模型信息
        .route("/get_labels", post(handlers::get_labels_handler))
        .route("/models/:name/labels", get(handlers::labels_handler))
        .route("/models/:name/config", get(handlers::config_handler))
        // OCR
        .route("/models/:name/one_shot_ocr", post(handlers::one_shot_ocr_handler))
        .route("/models/:name/ocr", post(handlers::ocr_handler))
        // 系统路由
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "loaded_models": state.registry.loaded_models().len(),
    }))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Detection Serving",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "models_dir": state.registry.models_dir().display().to_string(),
        "loaded_models": state.registry.loaded_models(),
        "dev_mode": state.config.dev_mode,
        "features": {
            "ocr": state.recognizer.is_some(),
            "text_line_detection": state.line_detector.is_some(),
            "batch_processing": true,
            "annotated_images": true
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
