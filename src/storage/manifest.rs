// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Sidecar manifest recording what a split produced.
//!
//! Stored as `<base>.manifest.json` next to the parts. When present, `join`
//! refuses a reconstruction whose part count, length or digest differ.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DefectError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartManifest {
    pub base_name: String,
    pub chunk_size: u64,
    pub parts: usize,
    pub total_bytes: u64,
    /// Hex SHA-256 of the reassembled file.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

pub fn manifest_path(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{base}.manifest.json"))
}

impl PartManifest {
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = manifest_path(dir, &self.base_name);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DefectError::Storage(format!("encode manifest: {e}")))?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// `Ok(None)` when no manifest exists for `base`.
    pub fn load(dir: &Path, base: &str) -> Result<Option<Self>> {
        let path = manifest_path(dir, base);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest = serde_json::from_slice(&raw)
            .map_err(|e| DefectError::Storage(format!("invalid manifest {path:?}: {e}")))?;
        Ok(Some(manifest))
    }

    /// Delete the manifest for `base`. Returns whether one was removed.
    pub fn remove(dir: &Path, base: &str) -> Result<bool> {
        match fs::remove_file(manifest_path(dir, base)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify(&self, parts: usize, total_bytes: u64, sha256: &str) -> Result<()> {
        let mismatch = |reason: String| DefectError::Manifest {
            base: self.base_name.clone(),
            reason,
        };
        if parts != self.parts {
            return Err(mismatch(format!("expected {} parts, found {parts}", self.parts)));
        }
        if total_bytes != self.total_bytes {
            return Err(mismatch(format!(
                "expected {} bytes, joined {total_bytes}",
                self.total_bytes
            )));
        }
        if !sha256.eq_ignore_ascii_case(&self.sha256) {
            return Err(mismatch(format!("sha256 {sha256} != {}", self.sha256)));
        }
        Ok(())
    }
}
