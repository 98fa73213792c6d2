//! # Upload Policy
//!
//! Server-side checks applied before a client is allowed to push listing
//! images to the file host. Approved files get the storage key they must use.

use crate::config::UploadConfig;
use market_core::{FieldError, MarketError, MarketResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedUpload {
    pub name: String,
    pub key: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    config: UploadConfig,
}

/// Lowercase, dash-separated file name safe for object keys
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.chars().take(80).collect()
    }
}

impl UploadPolicy {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    /// Approve every file or reject the whole batch with per-file detail
    pub fn approve(&self, user_id: Uuid, files: &[UploadFile]) -> MarketResult<Vec<ApprovedUpload>> {
        if files.is_empty() {
            return Err(MarketError::field("files", "at least one file is required"));
        }
        if files.len() > self.config.max_files {
            return Err(MarketError::field(
                "files",
                format!("at most {} files per upload", self.config.max_files),
            ));
        }

        let mut problems = Vec::new();
        for (idx, file) in files.iter().enumerate() {
            if !ALLOWED_CONTENT_TYPES.contains(&file.content_type.as_str()) {
                problems.push(FieldError::new(
                    format!("files[{idx}].contentType"),
                    format!("{} is not an allowed image type", file.content_type),
                ));
            }
            if file.size == 0 || file.size > self.config.max_bytes {
                problems.push(FieldError::new(
                    format!("files[{idx}].size"),
                    format!("file must be between 1 and {} bytes", self.config.max_bytes),
                ));
            }
        }
        if !problems.is_empty() {
            return Err(MarketError::Validation(problems));
        }

        Ok(files
            .iter()
            .map(|file| ApprovedUpload {
                name: file.name.clone(),
                key: format!("listings/{user_id}/{}-{}", Uuid::new_v4(), slug(&file.name)),
                content_type: file.content_type.clone(),
            })
            .collect())
    }
}
