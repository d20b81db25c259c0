//! HTTP接口集成测试：使用假的推理引擎和识别器驱动完整路由

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use detection_serving::{
    detection::BoundingBox,
    models::{
        DetectionEngine, EngineFactory, ModelConfig, RawDetection, TextLineDetector,
        TextRecognizer,
    },
    web::{create_app, AppState},
    Config, Result,
};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use serde_json::Value;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const BOUNDARY: &str = "detection-serving-test-boundary";

const MODEL_CONFIG: &str = r#"{
    "inference_engine_name": "onnx_detection",
    "confidence": 60,
    "predictions": 15,
    "number_of_classes": 2,
    "framework": "onnx",
    "type": "detection",
    "network": "ssd"
}"#;

/// 返回20个高于阈值的候选框和两个低于阈值的候选框
struct FakeEngine;

impl DetectionEngine for FakeEngine {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let mut raw: Vec<RawDetection> = (0..20)
            .map(|i| RawDetection {
                class_id: 1 + i % 2,
                score: 0.61 + i as f32 * 0.015,
                bbox: [0.1, 0.1, 0.5, 0.5],
            })
            .collect();
        raw.push(RawDetection {
            class_id: 1,
            score: 0.2,
            bbox: [0.0, 0.0, 1.0, 1.0],
        });
        raw.push(RawDetection {
            class_id: 2,
            score: 0.59,
            bbox: [0.0, 0.0, 1.0, 1.0],
        });
        Ok(raw)
    }
}

#[derive(Default)]
struct FakeFactory {
    builds: AtomicUsize,
}

impl EngineFactory for FakeFactory {
    fn build(&self, _graph: &[u8], _config: &ModelConfig) -> Result<Arc<dyn DetectionEngine>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine))
    }
}

/// 把图像尺寸作为识别文本
struct FakeRecognizer;

impl TextRecognizer for FakeRecognizer {
    fn recognize_text(&self, images: &[DynamicImage]) -> Result<Vec<(String, f32)>> {
        Ok(images
            .iter()
            .map(|image| {
                let (w, h) = image.dimensions();
                (format!("{}x{}", w, h), 0.9)
            })
            .collect())
    }
}

/// 什么也识别不出来
struct BlankRecognizer;

impl TextRecognizer for BlankRecognizer {
    fn recognize_text(&self, images: &[DynamicImage]) -> Result<Vec<(String, f32)>> {
        Ok(images.iter().map(|_| (String::new(), 0.0)).collect())
    }
}

/// 返回固定的两行文本框（第二行在上方）
struct TwoLines;

impl TextLineDetector for TwoLines {
    fn detect_lines(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        Ok(vec![
            BoundingBox {
                left: 4,
                top: 30,
                right: 44,
                bottom: 40,
            },
            BoundingBox {
                left: 2,
                top: 5,
                right: 62,
                bottom: 17,
            },
        ])
    }
}

struct TestServer {
    app: Router,
    factory: Arc<FakeFactory>,
    _models: TempDir,
}

fn write_model(root: &Path, name: &str, graph: &[u8]) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Config.json"), MODEL_CONFIG).unwrap();
    fs::write(dir.join("frozen_inference_graph.onnx"), graph).unwrap();
    fs::write(
        dir.join("object-detection.pbtxt"),
        "item {\n  id: 1\n  name: 'cat'\n}\nitem {\n  id: 2\n  name: 'dog'\n}\n",
    )
    .unwrap();
}

fn server_with(ocr: bool, max_image_size: Option<usize>) -> TestServer {
    let recognizer: Option<Arc<dyn TextRecognizer>> = if ocr {
        Some(Arc::new(FakeRecognizer))
    } else {
        None
    };
    build_server(recognizer, None, max_image_size)
}

fn build_server(
    recognizer: Option<Arc<dyn TextRecognizer>>,
    line_detector: Option<Arc<dyn TextLineDetector>>,
    max_image_size: Option<usize>,
) -> TestServer {
    let models = tempfile::tempdir().unwrap();
    write_model(models.path(), "pets", b"pets-graph");
    write_model(models.path(), "cars", b"cars-graph");

    // 缺少冻结图的模型
    let broken = models.path().join("broken");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("Config.json"), MODEL_CONFIG).unwrap();

    let mut config =
        Config::new("127.0.0.1:0".to_string(), models.path(), None, Some(1), false).unwrap();
    if let Some(size) = max_image_size {
        config.server_config.max_image_size = size;
    }

    let factory = Arc::new(FakeFactory::default());
    let mut state = AppState::new(config, factory.clone(), recognizer);
    if let Some(detector) = line_detector {
        state = state.with_line_detector(detector);
    }

    TestServer {
        app: create_app(state),
        factory,
        _models: models,
    }
}

fn server() -> TestServer {
    server_with(true, None)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 120, 40]),
    ));
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

fn multipart_body(fields: &[(&str, &str)], files: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (i, data) in files.iter().enumerate() {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"image{}.png\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, i
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, fields: &[(&str, &str)], files: &[Vec<u8>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(fields, files)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn load(app: &Router, name: &str) -> String {
    let (status, body) = send_json(app, get(&format!("/models/{}/load", name))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["data"]["hash"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_list_models_does_not_load() {
    let server = server();

    let (status, body) = send_json(&server.app, get("/models")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["models"],
        serde_json::json!(["broken", "cars", "pets"])
    );
    assert_eq!(server.factory.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_and_unloaded_models() {
    let server = server();
    let image = png(64, 48);

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/missing/predict", &[], &[image.clone()]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "MODEL_NOT_FOUND");

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[], &[image]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MODEL_NOT_LOADED");

    let (status, _) = send_json(&server.app, get("/models/missing/load")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_detect_with_unloaded_model_name() {
    let server = server();

    let (status, body) = send_json(
        &server.app,
        multipart_request("/detect", &[("model", "pets")], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "MODEL_NOT_LOADED");
    assert_eq!(server.factory.builds.load(Ordering::SeqCst), 0);

    let (status, body) = send_json(
        &server.app,
        multipart_request("/detect", &[("model", "missing")], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MODEL_NOT_FOUND");
}

#[tokio::test]
async fn test_load_is_idempotent() {
    let server = server();

    let first = load(&server.app, "pets").await;
    let second = load(&server.app, "pets").await;

    assert_eq!(first.len(), 64);
    assert_eq!(first, second);
    assert_eq!(server.factory.builds.load(Ordering::SeqCst), 1);

    // 强制重新加载会重新构建引擎，但内容未变时哈希不变
    let (status, body) = send_json(&server.app, get("/models/pets/load?force=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hash"], first.as_str());
    assert_eq!(server.factory.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_load_all_reports_each_model() {
    let server = server();

    let (status, body) = send_json(&server.app, get("/load")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pets"]["success"], true);
    assert_eq!(body["data"]["cars"]["success"], true);
    assert_eq!(body["data"]["broken"]["success"], false);
    assert!(body["data"]["broken"]["error"].is_string());
    assert_ne!(body["data"]["pets"]["hash"], body["data"]["cars"]["hash"]);
}

#[tokio::test]
async fn test_predict_returns_top_detections() {
    let server = server();
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let detections = body["data"].as_array().unwrap();
    assert_eq!(detections.len(), 15);

    let confidences: Vec<f64> = detections
        .iter()
        .map(|d| d["confidence"].as_f64().unwrap())
        .collect();
    assert!(confidences.iter().all(|c| *c >= 60.0));
    assert!(confidences.windows(2).all(|w| w[0] >= w[1]));

    let first = &detections[0];
    assert!(first["ObjectClassName"] == "cat" || first["ObjectClassName"] == "dog");
    assert_eq!(first["coordinates"]["left"], 6);
    assert_eq!(first["coordinates"]["top"], 5);
    assert_eq!(first["coordinates"]["right"], 32);
    assert_eq!(first["coordinates"]["bottom"], 24);
}

#[tokio::test]
async fn test_request_overrides_only_tighten() {
    let server = server();
    load(&server.app, "pets").await;

    let (_, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[("predictions", "3")], &[png(64, 48)]),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (_, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[("predictions", "100")], &[png(64, 48)]),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 15);

    let (_, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[("confidence", "80")], &[png(64, 48)]),
    )
    .await;
    assert!(body["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|d| d["confidence"].as_f64().unwrap() >= 80.0));

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[("confidence", "high")], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_detect_by_hash_returns_bare_list() {
    let server = server();
    let hash = load(&server.app, "cars").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/detect", &[("model", &hash)], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 15);
}

#[tokio::test]
async fn test_predict_batch_keeps_order() {
    let server = server();
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request(
            "/models/pets/predict_batch",
            &[("predictions", "2")],
            &[png(64, 48), png(200, 100)],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let batch = body["data"].as_array().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0][0]["coordinates"]["right"], 32);
    assert_eq!(batch[1][0]["coordinates"]["right"], 100);
}

#[tokio::test]
async fn test_predict_image_returns_jpeg() {
    let server = server();
    load(&server.app, "pets").await;

    let response = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/models/pets/predict_image",
            &[],
            &[png(64, 48)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let annotated = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
    assert_eq!(annotated.dimensions(), (64, 48));
}

#[tokio::test]
async fn test_labels_config_and_label_hashes() {
    let server = server();
    let hash = load(&server.app, "pets").await;

    let (_, body) = send_json(&server.app, get("/models/pets/labels")).await;
    assert_eq!(body["data"], serde_json::json!(["cat", "dog"]));

    let (_, body) = send_json(&server.app, get("/models/pets/config")).await;
    assert_eq!(body["data"]["predictions"], 15);
    assert_eq!(body["data"]["type"], "detection");

    let (status, body) = send_json(
        &server.app,
        multipart_request("/get_labels", &[("model", &hash)], &[]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let labels = body["data"].as_object().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels["cat"].as_str().unwrap().len(), 64);
    assert_ne!(labels["cat"], labels["dog"]);

    let (status, _) = send_json(&server.app, get("/models/cars/labels")).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_one_shot_ocr_labels_regions() {
    let server = server();
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/one_shot_ocr", &[("predictions", "2")], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["text"], "26x19");
    assert!(results[0]["label"].is_string());
    assert!(body["data"]["processing_time"].is_number());
}

#[tokio::test]
async fn test_ocr_whole_image() {
    let server = server();
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/ocr", &[], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "64x48");
    assert!(results[0].get("label").is_none());
}

#[tokio::test]
async fn test_ocr_reads_each_detected_line() {
    let server = build_server(Some(Arc::new(FakeRecognizer)), Some(Arc::new(TwoLines)), None);
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/ocr", &[], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    // 按阅读顺序，每行带有自己的框
    assert_eq!(results[0]["text"], "60x12");
    assert_eq!(results[0]["bounding_box"]["left"], 2);
    assert_eq!(results[0]["bounding_box"]["top"], 5);
    assert_eq!(results[0]["bounding_box"]["right"], 62);
    assert_eq!(results[0]["bounding_box"]["bottom"], 17);
    assert_eq!(results[1]["text"], "40x10");
    assert_eq!(results[1]["bounding_box"]["top"], 30);
}

#[tokio::test]
async fn test_ocr_without_text_is_rejected() {
    let server = build_server(Some(Arc::new(BlankRecognizer)), None, None);
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/ocr", &[], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/one_shot_ocr", &[], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_ocr_unavailable_without_recognizer() {
    let server = server_with(false, None);
    load(&server.app, "pets").await;

    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/ocr", &[], &[png(64, 48)]),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "OCR_UNAVAILABLE");
}

#[tokio::test]
async fn test_upload_validation() {
    let server = server_with(true, Some(32));
    load(&server.app, "pets").await;

    // 图片超过大小限制
    let (status, body) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[], &[png(64, 48)]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "FILE_TOO_LARGE");

    // 没有上传文件
    let (status, _) = send_json(
        &server.app,
        multipart_request("/models/pets/predict", &[("predictions", "1")], &[]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 不支持的请求类型
    let request = Request::builder()
        .method(Method::POST)
        .uri("/models/pets/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send_json(&server.app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_health_reports_loaded_models() {
    let server = server();
    load(&server.app, "cars").await;

    let (status, body) = send_json(&server.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["loaded_models"], 1);
}

#[tokio::test]
async fn test_info_reports_features() {
    let server = build_server(Some(Arc::new(FakeRecognizer)), Some(Arc::new(TwoLines)), None);
    load(&server.app, "pets").await;

    let (status, body) = send_json(&server.app, get("/api/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dev_mode"], false);
    assert!(body["loaded_models"]["pets"].is_string());
    assert_eq!(body["features"]["ocr"], true);
    assert_eq!(body["features"]["text_line_detection"], true);

    let plain = server_with(false, None);
    let (_, body) = send_json(&plain.app, get("/api/info")).await;
    assert_eq!(body["features"]["ocr"], false);
    assert_eq!(body["features"]["text_line_detection"], false);
}
