// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Startup assembly: materialize every configured artifact from its parts
//! before the API accepts traffic.
//!
//! Runs once per process. Any failure aborts startup so the service never
//! serves with missing or truncated weights.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::config::ArtifactConfig;
use crate::error::Result;
use crate::storage::parts::ChunkStore;

/// Outcome of reassembling one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    pub name: String,
    pub path: PathBuf,
    pub parts: usize,
    pub bytes: u64,
}

/// Join one artifact, creating the destination's parent directory first.
pub fn materialize(artifact: &ArtifactConfig) -> Result<ArtifactStatus> {
    if let Some(parent) = artifact.reassembled_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let report = ChunkStore::join(&artifact.parts_dir, &artifact.reassembled_path)?;
    info!(
        artifact = artifact.name,
        parts = report.parts,
        bytes = report.total_bytes,
        path = ?artifact.reassembled_path,
        "Artifact reassembled"
    );

    Ok(ArtifactStatus {
        name: artifact.name.clone(),
        path: artifact.reassembled_path.clone(),
        parts: report.parts,
        bytes: report.total_bytes,
    })
}

/// Join every artifact in order, stopping at the first error.
pub fn materialize_all(artifacts: &[ArtifactConfig]) -> Result<Vec<ArtifactStatus>> {
    artifacts.iter().map(materialize).collect()
}

/// [`materialize_all`] on the blocking pool, for use from async startup code.
pub async fn materialize_all_blocking(artifacts: Vec<ArtifactConfig>) -> Result<Vec<ArtifactStatus>> {
    tokio::task::spawn_blocking(move || materialize_all(&artifacts))
        .await
        .map_err(|e| crate::error::DefectError::Storage(format!("assembly task failed: {e}")))?
}
