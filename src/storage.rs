use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Method, StatusCode};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::keys;
use crate::settings::{normalize_prefix, ConfigError, Settings};
use crate::sigv4::{self, Credentials};

// ── Storage client seam ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {0} for key {1}")]
    UnexpectedStatus(StatusCode, String),
}

/// Object-storage collaborator: upload, delete and link objects by key.
/// `presign` and `public_url` are pure URL construction, no network.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn presign(&self, key: &str, expires_secs: u64) -> String;

    fn public_url(&self, key: &str) -> String;
}

// ── S3 REST implementation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// Host override for S3-compatible providers, e.g. "s3.example.com".
    pub endpoint: Option<String>,
}

impl S3Config {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            access_key_id: settings.secret_id.trim().to_string(),
            secret_access_key: settings.secret_key.trim().to_string(),
            bucket: settings.bucket.trim().to_string(),
            region: settings.region.trim().to_string(),
            endpoint: settings.endpoint.clone(),
        })
    }

    /// Virtual-hosted-style bucket host.
    fn host(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => {
                let endpoint = endpoint
                    .trim()
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                format!("{}.{}", self.bucket, endpoint)
            }
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

pub struct S3Client {
    http: reqwest::Client,
    credentials: Credentials,
    region: String,
    host: String,
    /// Scheme + authority requests are sent to. Same as `https://<host>`
    /// outside of tests.
    base_url: String,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let host = config.host();
        Ok(Self {
            http,
            credentials: Credentials {
                access_key_id: config.access_key_id,
                secret_access_key: config.secret_access_key,
            },
            region: config.region,
            base_url: format!("https://{}", host),
            host,
        })
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<(Vec<u8>, String)>,
    ) -> Result<(), StorageError> {
        let path = keys::encoded_key_path(key);
        let payload_hash = match &body {
            Some((bytes, _)) => sigv4::sha256_hex(bytes),
            None => sigv4::sha256_hex(b""),
        };
        let now = Utc::now();
        let signed_headers = sigv4::sign_request(
            &self.credentials,
            &self.region,
            method.as_str(),
            &self.host,
            &path,
            body.as_ref().map(|(_, content_type)| content_type.as_str()),
            &payload_hash,
            &now,
        );

        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        for (name, value) in signed_headers {
            request = request.header(name, value);
        }
        if let Some((bytes, content_type)) = body {
            request = request.header("content-type", content_type).body(bytes);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("storage request for {} failed with {}", key, status);
            return Err(StorageError::UnexpectedStatus(status, key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageClient for S3Client {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        debug!("PUT {} ({} bytes, {})", key, body.len(), content_type);
        self.send(Method::PUT, key, Some((body, content_type.to_string())))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!("DELETE {}", key);
        self.send(Method::DELETE, key, None).await
    }

    fn presign(&self, key: &str, expires_secs: u64) -> String {
        sigv4::presign_url(
            &self.credentials,
            &self.region,
            &self.host,
            &keys::encoded_key_path(key),
            expires_secs,
            &Utc::now(),
        )
    }

    fn public_url(&self, key: &str) -> String {
        keys::public_url(&self.host, key)
    }
}

// ── Uploader ───────────────────────────────────────────────────────────────

/// `{url, key}` pair for a finished upload. Consumed immediately by the
/// buffer rewrite, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub url: String,
    pub key: String,
}

/// Storage client plus the settings-derived naming and link policy.
pub struct Uploader {
    client: Arc<dyn StorageClient>,
    prefix: String,
    use_presigned: bool,
    presign_expiry_secs: u64,
}

impl Uploader {
    pub fn new(
        client: Arc<dyn StorageClient>,
        key_prefix: &str,
        use_presigned: bool,
        presign_expiry_secs: u64,
    ) -> Self {
        Self {
            client,
            prefix: normalize_prefix(key_prefix),
            use_presigned,
            presign_expiry_secs,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let client = S3Client::new(S3Config::from_settings(settings)?)?;
        Ok(Self::new(
            Arc::new(client),
            &settings.key_prefix,
            settings.use_presigned_urls,
            settings.presign_expiry_secs,
        ))
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<UploadResult, StorageError> {
        let key = keys::object_key(&self.prefix, Utc::now().timestamp_millis(), filename);
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| infer_content_type(filename).to_string());
        info!("uploading {} bytes as {}", bytes.len(), key);
        self.client.put(&key, bytes, &content_type).await?;

        let url = if self.use_presigned {
            self.client.presign(&key, self.presign_expiry_secs)
        } else {
            self.client.public_url(&key)
        };
        Ok(UploadResult { url, key })
    }

    pub async fn delete_key(&self, key: &str) -> Result<(), StorageError> {
        info!("deleting remote object {}", key);
        self.client.delete(key).await
    }
}

fn infer_content_type(filename: Option<&str>) -> &'static str {
    let ext = filename
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

// ── Uploader configuration cell ────────────────────────────────────────────

/// Process-wide slot holding the current uploader. Re-evaluated on every
/// settings mutation: valid settings swap in a fresh uploader, invalid ones
/// clear the slot so paste interception and the delete actions turn off.
#[derive(Default)]
pub struct UploaderCell {
    inner: RwLock<Option<Arc<Uploader>>>,
}

impl UploaderCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconfigure(&self, settings: &Settings) -> Result<(), ConfigError> {
        let mut slot = self.inner.write().expect("uploader cell lock");
        match Uploader::from_settings(settings) {
            Ok(uploader) => {
                *slot = Some(Arc::new(uploader));
                Ok(())
            }
            Err(e) => {
                info!("uploader disabled: {}", e);
                *slot = None;
                Err(e)
            }
        }
    }

    /// Swap in an uploader built around a custom storage client.
    pub fn install(&self, uploader: Uploader) {
        let mut slot = self.inner.write().expect("uploader cell lock");
        *slot = Some(Arc::new(uploader));
    }

    pub fn clear(&self) {
        let mut slot = self.inner.write().expect("uploader cell lock");
        *slot = None;
    }

    pub fn current(&self) -> Option<Arc<Uploader>> {
        self.inner.read().expect("uploader cell lock").clone()
    }

    pub fn is_configured(&self) -> bool {
        self.inner.read().expect("uploader cell lock").is_some()
    }
}
