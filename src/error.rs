// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefectError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Part storage error: {0}")]
    Storage(String),

    #[error("Manifest mismatch for '{base}': {reason}")]
    Manifest { base: String, reason: String },

    #[error("Unsupported model '{name}'")]
    UnknownModel { name: String },

    #[error("No inference backend attached for model '{name}'")]
    BackendUnavailable { name: String },

    #[error("Inference error: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, DefectError>;
