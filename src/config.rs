// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{DefectError, Result};
use crate::models::ModelKind;
use crate::storage::parts::{ChunkStore, DEFAULT_CHUNK_SIZE_MB};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Part storage defaults.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Large files reassembled from committed parts before serving.
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
    /// Models exposed by the API. Empty means all known models.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// HTTP API configuration (optional).
    #[serde(default)]
    pub api: ApiConfig,
}

/// HTTP API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Whether to enable the HTTP API.
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    /// Port to listen on. The `PORT` environment variable takes precedence.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: default_api_enabled(), port: default_api_port() }
    }
}

fn default_api_enabled() -> bool { true }
fn default_api_port() -> u16 { 5000 }

/// Defaults shared by every part set.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Maximum size of one part in megabytes.
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// Write `<base>.manifest.json` alongside parts on split.
    #[serde(default = "default_write_manifest")]
    pub write_manifest: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            write_manifest: default_write_manifest(),
        }
    }
}

fn default_chunk_size_mb() -> u64 { DEFAULT_CHUNK_SIZE_MB }
fn default_write_manifest() -> bool { true }

/// One file stored as a part set.
#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactConfig {
    /// Unique identifier used in logs and the status endpoint.
    pub name: String,
    /// Directory holding `<basename(reassembled_path)>.part<N>`.
    pub parts_dir: PathBuf,
    /// Where the joined file is written.
    pub reassembled_path: PathBuf,
    /// Part boundary for this artifact; falls back to `storage.chunk_size_mb`.
    #[serde(default)]
    pub chunk_size_mb: Option<u64>,
}

impl ArtifactConfig {
    /// Store used when (re)splitting this artifact.
    pub fn chunk_store(&self, storage: &StorageConfig) -> Result<ChunkStore> {
        let mb = self.chunk_size_mb.unwrap_or(storage.chunk_size_mb);
        Ok(ChunkStore::from_mb(mb)?.with_manifest(storage.write_manifest))
    }
}

/// A model served by the API.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// `mobilenetv2`, `resnet-50` or `yolov8` (case-insensitive).
    pub name: String,
    /// Weight file the inference backend loads from.
    #[serde(default)]
    pub weights: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DefectError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DefectError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn artifact(&self, name: &str) -> Option<&ArtifactConfig> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.chunk_size_mb == 0 {
            return Err(DefectError::Config("chunk_size_mb must be > 0".into()));
        }
        let mut names = HashSet::new();
        for a in &self.artifacts {
            if a.name.is_empty() {
                return Err(DefectError::Config("artifact name must not be empty".into()));
            }
            if !names.insert(a.name.as_str()) {
                return Err(DefectError::Config(format!("duplicate artifact '{}'", a.name)));
            }
            if a.chunk_size_mb == Some(0) {
                return Err(DefectError::Config(format!(
                    "artifact '{}': chunk_size_mb must be > 0",
                    a.name
                )));
            }
            if a.reassembled_path.file_name().is_none() {
                return Err(DefectError::Config(format!(
                    "artifact '{}': reassembled_path has no file name",
                    a.name
                )));
            }
        }
        for m in &self.models {
            ModelKind::parse(&m.name)
                .map_err(|e| DefectError::Config(format!("[[models]]: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[storage]
chunk_size_mb = 15

[[artifacts]]
name = "resnet-50"
parts_dir = "models/split_models/best_model_50_4"
reassembled_path = "models/best_model_50_4.pth"

[[artifacts]]
name = "yolov8"
parts_dir = "models/split_models/best"
reassembled_path = "models/best.pt"
chunk_size_mb = 20

[[models]]
name = "YOLOv8"
weights = "models/best.pt"

[api]
port = 8081
"#;

    #[test]
    fn parses_sample() {
        let cfg = Config::from_toml(SAMPLE).expect("parse");
        assert_eq!(cfg.artifacts.len(), 2);
        assert!(cfg.storage.write_manifest);
        assert_eq!(cfg.api.port, 8081);
        assert!(cfg.api.enabled);

        let yolo = cfg.artifact("yolov8").expect("artifact");
        let store = yolo.chunk_store(&cfg.storage).expect("store");
        assert_eq!(store.chunk_size(), 20 * 1024 * 1024);
        let resnet = cfg.artifact("resnet-50").expect("artifact");
        assert_eq!(resnet.chunk_store(&cfg.storage).unwrap().chunk_size(), 15 * 1024 * 1024);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::from_toml("").expect("parse");
        assert_eq!(cfg.storage.chunk_size_mb, 15);
        assert_eq!(cfg.api.port, 5000);
        assert!(cfg.artifacts.is_empty());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(Config::from_toml("[storage]\nchunk_size_mb = 0\n").is_err());
    }

    #[test]
    fn rejects_duplicate_artifacts() {
        let toml = r#"
[[artifacts]]
name = "a"
parts_dir = "p"
reassembled_path = "x.bin"
[[artifacts]]
name = "a"
parts_dir = "q"
reassembled_path = "y.bin"
"#;
        assert!(matches!(Config::from_toml(toml), Err(DefectError::Config(_))));
    }

    #[test]
    fn rejects_unknown_model() {
        let toml = "[[models]]\nname = \"vgg16\"\n";
        assert!(Config::from_toml(toml).is_err());
    }
}
