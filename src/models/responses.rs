//! JSON payloads returned by the object endpoints.

use serde::{Deserialize, Serialize};

/// Confirmation returned after a successful upload.
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub message: String,
    pub name: String,
    /// Path the object can be fetched from.
    pub url: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
}

/// Confirmation returned after a successful delete.
#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteResponse {
    pub message: String,
}
