//! HTTP API tests against a live listener on an ephemeral port.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use defectd::api::{build_router, AppState};
use defectd::config::ModelConfig;
use defectd::error::Result;
use defectd::models::{Detection, Detector, ModelKind, ModelRegistry, RawOutput};

const BOUNDARY: &str = "defectd-test-boundary";

struct Fixed(RawOutput);

impl Detector for Fixed {
    fn infer(&self, _image: &[u8]) -> Result<RawOutput> {
        Ok(self.0.clone())
    }
}

async fn spawn_app(registry: ModelRegistry) -> String {
    let state = Arc::new(AppState { registry: Arc::new(registry), artifacts: Vec::new() });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.expect("serve");
    });
    addr
}

/// Send one HTTP/1.1 request and return (status, body).
async fn send(addr: &str, method: &str, path: &str, content_type: Option<&str>, body: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    stream.write_all(head.as_bytes()).await.expect("write head");
    stream.write_all(body).await.expect("write body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let text = String::from_utf8_lossy(&raw).to_string();
    let status = text[9..12].parse().expect("status code");
    let body = text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

fn multipart(fields: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, filename, data) in fields {
        out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => out.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        out.extend_from_slice(data.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    out
}

fn form_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

fn registry_with_backends() -> ModelRegistry {
    let reg = ModelRegistry::from_config(&[]).expect("registry");
    reg.attach(ModelKind::ResNet50, Arc::new(Fixed(RawOutput::Scores(vec![0.9, 0.1, 0.1, 0.1]))))
        .unwrap();
    reg.attach(ModelKind::MobileNetV2, Arc::new(Fixed(RawOutput::Scores(vec![-4.0, -4.0, -4.0, 4.0]))))
        .unwrap();
    reg.attach(
        ModelKind::YoloV8,
        Arc::new(Fixed(RawOutput::Detections {
            detections: vec![Detection { class_id: 1, confidence: 0.7 }],
            annotated_jpeg: Some(vec![1, 2, 3]),
        })),
    )
    .unwrap();
    reg
}

#[tokio::test]
async fn test_health_and_index() {
    let addr = spawn_app(ModelRegistry::from_config(&[]).unwrap()).await;

    let (status, body) = send(&addr, "GET", "/api/health", None, b"").await;
    assert_eq!(status, 200);
    assert!(body.contains(r#""status":"ok""#));

    let (status, body) = send(&addr, "GET", "/", None, b"").await;
    assert_eq!(status, 200);
    assert!(body.contains("Backend is running!"));
}

#[tokio::test]
async fn test_classes_endpoint() {
    let addr = spawn_app(ModelRegistry::from_config(&[]).unwrap()).await;

    let (status, body) = send(&addr, "GET", "/api/classes?model_name=ResNet-50", None, b"").await;
    assert_eq!(status, 200);
    assert!(body.contains(r#""2":"defectless""#));

    let (status, body) = send(&addr, "GET", "/api/classes?model_name=vgg", None, b"").await;
    assert_eq!(status, 400);
    assert!(body.contains("Invalid model name"));
}

#[tokio::test]
async fn test_detect_single() {
    let addr = spawn_app(registry_with_backends()).await;
    let body = multipart(&[("image", Some("tile.jpg"), "jpeg"), ("model_name", None, "resnet-50")]);

    let (status, resp) = send(&addr, "POST", "/api/detect", Some(&form_type()), &body).await;
    assert_eq!(status, 200, "{resp}");
    let v: serde_json::Value = serde_json::from_str(&resp).expect("json");
    assert_eq!(v["filename"], "tile.jpg");
    assert_eq!(v["hasDefect"], true);
    assert_eq!(v["label"], "crack");
    assert_eq!(v["model"], "resnet-50");
}

#[tokio::test]
async fn test_detect_missing_fields() {
    let addr = spawn_app(registry_with_backends()).await;
    let body = multipart(&[("image", Some("tile.jpg"), "jpeg")]);

    let (status, resp) = send(&addr, "POST", "/api/detect", Some(&form_type()), &body).await;
    assert_eq!(status, 400);
    assert!(resp.contains("Missing image or model_name"));
}

#[tokio::test]
async fn test_detect_without_backend_is_unavailable() {
    let cfg = vec![ModelConfig { name: "yolov8".into(), weights: None }];
    let addr = spawn_app(ModelRegistry::from_config(&cfg).unwrap()).await;
    let body = multipart(&[("image", Some("a.jpg"), "x"), ("model_name", None, "YOLOv8")]);

    let (status, _) = send(&addr, "POST", "/api/detect", Some(&form_type()), &body).await;
    assert_eq!(status, 503);
}

#[tokio::test]
async fn test_detect_batch_and_all() {
    let addr = spawn_app(registry_with_backends()).await;

    let body = multipart(&[
        ("images", Some("a.jpg"), "a"),
        ("images", Some("b.jpg"), "b"),
        ("model_name", None, "MobileNetV2"),
    ]);
    let (status, resp) = send(&addr, "POST", "/api/detect/batch", Some(&form_type()), &body).await;
    assert_eq!(status, 200, "{resp}");
    let v: serde_json::Value = serde_json::from_str(&resp).expect("json");
    assert_eq!(v.as_array().map(Vec::len), Some(2));
    assert_eq!(v[1]["filename"], "b.jpg");
    assert_eq!(v[0]["label"], "defectless");
    assert_eq!(v[0]["hasDefect"], false);

    let body = multipart(&[("image", Some("a.jpg"), "a")]);
    let (status, resp) = send(&addr, "POST", "/api/detect/all", Some(&form_type()), &body).await;
    assert_eq!(status, 200, "{resp}");
    let v: serde_json::Value = serde_json::from_str(&resp).expect("json");
    assert_eq!(v["YOLOv8"]["label"], "lines");
    assert_eq!(v["YOLOv8"]["annotated_image_base64"], "AQID");
    assert_eq!(v["ResNet-50"]["model"], "ResNet-50");
    assert_eq!(v["MobileNetV2"]["hasDefect"], false);

    let body = multipart(&[("images", Some("a.jpg"), "a"), ("images", Some("b.jpg"), "b")]);
    let (status, resp) = send(&addr, "POST", "/api/detect/batch/all", Some(&form_type()), &body).await;
    assert_eq!(status, 200, "{resp}");
    let v: serde_json::Value = serde_json::from_str(&resp).expect("json");
    assert_eq!(v["YOLOv8"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_start_server_reports_bind_failure() {
    let taken = TcpListener::bind("0.0.0.0:0").await.expect("bind");
    let port = taken.local_addr().expect("addr").port();
    let state = Arc::new(AppState {
        registry: Arc::new(ModelRegistry::from_config(&[]).unwrap()),
        artifacts: Vec::new(),
    });

    let res = defectd::api::start_server(state, port).await;
    assert!(res.is_err(), "second bind on port {port} should fail");
}
