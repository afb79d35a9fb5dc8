use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ── Plugin settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Access key id for the bucket.
    #[serde(default)]
    pub secret_id: String,
    /// Secret access key for the bucket.
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Optional S3-compatible host override, e.g. "s3.example.com". When
    /// unset the standard `s3.<region>.amazonaws.com` host is used.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Folder-style prefix prepended to every object key.
    #[serde(default)]
    pub key_prefix: String,
    /// Use time-limited presigned links instead of public-read URLs.
    #[serde(default)]
    pub use_presigned_urls: bool,
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
}

fn default_presign_expiry() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret_id: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
            key_prefix: String::new(),
            use_presigned_urls: false,
            presign_expiry_secs: default_presign_expiry(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0} in uploader settings")]
    Missing(&'static str),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl Settings {
    /// Check that everything the uploader needs is present. A failing check
    /// disables the upload/delete features rather than surfacing an error to
    /// the host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_id.trim().is_empty() {
            return Err(ConfigError::Missing("secret id"));
        }
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Missing("secret key"));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("bucket"));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        Ok(())
    }
}

/// Normalize a key prefix: strip surrounding slashes and whitespace, append
/// exactly one slash when non-empty. An empty or slash-only prefix stays
/// empty.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

// ── Settings persistence ───────────────────────────────────────────────────

/// Host seam for loading and persisting plugin settings.
pub trait SettingsStore {
    /// Load settings, falling back to defaults when nothing is stored yet or
    /// the stored payload cannot be read.
    fn load(&self) -> Settings;

    fn save(&self, settings: &Settings) -> Result<()>;
}

/// JSON file-backed store, one `settings.json` per vault/profile.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Settings {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("unreadable settings at {:?}: {}", self.path, e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing settings to {:?}", self.path))?;
        Ok(())
    }
}
