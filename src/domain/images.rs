//! Usage: Wire types for the image backend (records, pages, tokens, uploads).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One stored image as the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub s3_key: String,
    pub status: String,
    #[serde(default)]
    pub result_json: serde_json::Value,
    pub created_at: String,
}

impl ImageRecord {
    /// Display name derived from the storage key. Falls back to the id when
    /// the key carries no path component.
    pub fn file_name(&self) -> &str {
        self.s3_key
            .rsplit('/')
            .next()
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.image_id)
    }
}

/// One page of the image listing. `next_cursor == None` means the listing is
/// exhausted.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePage {
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Credential pair returned by login, register, and refresh. Both fields are
/// required; a response missing either one is treated as a failure upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Long-lived API token minted via the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Per-file acknowledgement from the upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub image_id: String,
    pub status: String,
}

/// Processing pipeline an upload is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Cloud,
    OnPremise,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Cloud => "cloud",
            Workflow::OnPremise => "on_premise",
        }
    }
}

/// In-memory file payload handed to the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}
