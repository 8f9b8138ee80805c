// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Model registry and prediction post-processing.
//!
//! Inference engines live outside this crate and plug in through the
//! [`Detector`] trait. This module owns what surrounds them: model names,
//! label maps, thresholding and the JSON-facing [`Prediction`].
//!
//! Models are registered once at startup and shared by all requests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{DefectError, Result};

/// Scores at or above this count as a detected label.
pub const THRESHOLD: f64 = 0.5;
pub const DEFECTLESS: &str = "defectless";

// ─────────────────────────────── ModelKind ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    MobileNetV2,
    ResNet50,
    YoloV8,
}

impl ModelKind {
    /// Order used by the "all models" endpoints.
    pub const ALL: [ModelKind; 3] = [ModelKind::YoloV8, ModelKind::ResNet50, ModelKind::MobileNetV2];

    /// Case-insensitive lookup by API name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mobilenetv2" => Ok(ModelKind::MobileNetV2),
            "resnet-50" => Ok(ModelKind::ResNet50),
            "yolov8" => Ok(ModelKind::YoloV8),
            _ => Err(DefectError::UnknownModel { name: name.to_string() }),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::MobileNetV2 => "MobileNetV2",
            ModelKind::ResNet50 => "ResNet-50",
            ModelKind::YoloV8 => "YOLOv8",
        }
    }

    /// Class labels by output index. Each model was trained with its own order.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            ModelKind::MobileNetV2 => &["crack", "others", "lines", "defectless"],
            ModelKind::ResNet50 => &["crack", "lines", "defectless", "others"],
            ModelKind::YoloV8 => &["crack", "lines", "others", "defectless"],
        }
    }

    pub fn label_map(self) -> BTreeMap<usize, &'static str> {
        self.labels().iter().copied().enumerate().collect()
    }

    /// MobileNetV2 emits raw logits; ResNet-50 ends in a sigmoid already.
    fn emits_logits(self) -> bool {
        matches!(self, ModelKind::MobileNetV2)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ─────────────────────────────── inference seam ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
}

/// What an inference backend hands back for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// One score per class, in label-map order.
    Scores(Vec<f32>),
    /// Detected instances plus an optional rendered overlay.
    Detections {
        detections: Vec<Detection>,
        annotated_jpeg: Option<Vec<u8>>,
    },
}

/// An inference backend for one model. Called from blocking worker threads.
pub trait Detector: Send + Sync {
    fn infer(&self, image: &[u8]) -> Result<RawOutput>;
}

// ─────────────────────────────── Prediction ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub filename: String,
    #[serde(rename = "hasDefect")]
    pub has_defect: bool,
    pub confidence: f64,
    pub label: String,
    pub model: String,
    pub predicted_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image_base64: Option<String>,
}

impl Prediction {
    fn new(filename: &str, model: &str, labels: &[&str], has_defect: bool, confidence: f64) -> Self {
        let joined = labels.join(", ");
        Self {
            filename: filename.to_string(),
            has_defect,
            confidence: round4(confidence),
            label: joined.clone(),
            model: model.to_string(),
            predicted_class: joined,
            annotated_image_base64: None,
        }
    }

    fn defectless(filename: &str, model: &str, confidence: f64) -> Self {
        Self::new(filename, model, &[DEFECTLESS], false, confidence)
    }
}

/// Turn raw backend output into a prediction.
///
/// `model` is echoed back as the caller spelled it.
pub fn predict(kind: ModelKind, model: &str, filename: &str, raw: RawOutput) -> Prediction {
    match raw {
        RawOutput::Scores(scores) => predict_scores(kind, model, filename, &scores),
        RawOutput::Detections { detections, annotated_jpeg } => {
            let mut pred = predict_detections(kind, model, filename, &detections);
            pred.annotated_image_base64 = annotated_jpeg.map(|jpeg| B64.encode(jpeg));
            pred
        }
    }
}

fn predict_scores(kind: ModelKind, model: &str, filename: &str, scores: &[f32]) -> Prediction {
    let labels = kind.labels();
    let detected: Vec<(&str, f64)> = scores
        .iter()
        .map(|&s| if kind.emits_logits() { sigmoid(s as f64) } else { s as f64 })
        .enumerate()
        .filter(|&(_, p)| p >= THRESHOLD)
        .filter_map(|(i, p)| labels.get(i).map(|&l| (l, p)))
        .collect();

    if detected.is_empty() {
        return Prediction::defectless(filename, model, 0.0);
    }

    let defects: Vec<&str> = detected
        .iter()
        .map(|&(l, _)| l)
        .filter(|&l| l != DEFECTLESS)
        .collect();

    if defects.is_empty() {
        let score = detected
            .iter()
            .find(|&&(l, _)| l == DEFECTLESS)
            .map_or(0.0, |&(_, p)| p);
        return Prediction::defectless(filename, model, score);
    }

    // Mean over every detected label, defectless included.
    let mean = detected.iter().map(|&(_, p)| p).sum::<f64>() / detected.len() as f64;
    Prediction::new(filename, model, &defects, true, mean)
}

fn predict_detections(kind: ModelKind, model: &str, filename: &str, detections: &[Detection]) -> Prediction {
    if detections.is_empty() {
        return Prediction::defectless(filename, model, 0.0);
    }

    let labels = kind.labels();
    let mut found: Vec<&str> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();

    for det in detections {
        let Some(&label) = labels.get(det.class_id) else {
            debug!(class_id = det.class_id, "Skipping detection with unknown class");
            continue;
        };
        if !found.contains(&label) {
            found.push(label);
        }
        confidences.push(det.confidence as f64);
    }

    // Something was detected even if no class is known: still a defect.
    let confidence = if confidences.is_empty() {
        1.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };
    Prediction::new(filename, model, &found, true, confidence)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// ─────────────────────────────── registry ────────────────────────────────────

struct ModelEntry {
    weights: Option<PathBuf>,
    detector: Option<Arc<dyn Detector>>,
}

/// Models available to the API, keyed by kind.
pub struct ModelRegistry {
    entries: RwLock<HashMap<ModelKind, ModelEntry>>,
}

impl ModelRegistry {
    /// Register the configured models. An empty list registers every kind.
    pub fn from_config(models: &[ModelConfig]) -> Result<Self> {
        let mut entries = HashMap::new();
        if models.is_empty() {
            for kind in ModelKind::ALL {
                entries.insert(kind, ModelEntry { weights: None, detector: None });
            }
        }
        for m in models {
            let kind = ModelKind::parse(&m.name)?;
            if let Some(w) = &m.weights {
                if !w.exists() {
                    warn!(model = %kind, weights = ?w, "Weight file not found");
                }
            }
            info!(model = %kind, weights = ?m.weights, "Model registered");
            entries.insert(kind, ModelEntry { weights: m.weights.clone(), detector: None });
        }
        Ok(Self { entries: RwLock::new(entries) })
    }

    /// Install the inference backend for a registered model.
    pub fn attach(&self, kind: ModelKind, detector: Arc<dyn Detector>) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&kind)
            .ok_or_else(|| DefectError::UnknownModel { name: kind.to_string() })?;
        entry.detector = Some(detector);
        info!(model = %kind, "Inference backend attached");
        Ok(())
    }

    /// Parse `name` and check the model is registered.
    pub fn resolve(&self, name: &str) -> Result<ModelKind> {
        let kind = ModelKind::parse(name)?;
        if self.entries.read().contains_key(&kind) {
            Ok(kind)
        } else {
            Err(DefectError::UnknownModel { name: name.to_string() })
        }
    }

    /// Registered kinds, in [`ModelKind::ALL`] order.
    pub fn kinds(&self) -> Vec<ModelKind> {
        let entries = self.entries.read();
        ModelKind::ALL.into_iter().filter(|k| entries.contains_key(k)).collect()
    }

    pub fn weights(&self, kind: ModelKind) -> Option<PathBuf> {
        self.entries.read().get(&kind).and_then(|e| e.weights.clone())
    }

    /// Run inference and post-processing for one image.
    pub fn classify(&self, kind: ModelKind, model: &str, filename: &str, image: &[u8]) -> Result<Prediction> {
        // Clone the handle so the lock is not held during inference.
        let detector = self
            .entries
            .read()
            .get(&kind)
            .and_then(|e| e.detector.clone())
            .ok_or_else(|| DefectError::BackendUnavailable { name: kind.to_string() })?;

        let raw = detector.infer(image)?;
        let pred = predict(kind, model, filename, raw);
        debug!(
            model = %kind,
            filename,
            has_defect = pred.has_defect,
            confidence = pred.confidence,
            "Image classified"
        );
        Ok(pred)
    }
}
