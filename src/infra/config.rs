//! Usage: Client configuration (backend base URL resolution + validation).

use crate::shared::error::{AppError, AppResult, CODE_INVALID_INPUT};
use std::env;

pub const ENV_API_BASE_URL: &str = "IMAGEHUB_API_BASE_URL";
const DEFAULT_API_BASE_URL: &str = "http://localhost:80";

/// Single externally tunable setting of this layer: the backend origin.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: String,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::from_env_get(|key| env::var(key).ok())
    }

    fn from_env_get(mut get: impl FnMut(&str) -> Option<String>) -> AppResult<Self> {
        let raw = get(ENV_API_BASE_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Self::new(&raw)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through unchanged; relative paths are joined to the
    /// configured base.
    pub(crate) fn resolve(&self, path_or_url: &str) -> String {
        let target = path_or_url.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }
}

fn normalize_base_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(CODE_INVALID_INPUT, "base url is required"));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(AppError::new(
            CODE_INVALID_INPUT,
            format!("base url must start with http:// or https://, got {trimmed}"),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
