//! Paste-to-upload engine for markdown notes: intercepts image paste events,
//! uploads the bytes to an S3-compatible bucket and rewrites the document to
//! reference the remote URL. The host editor, settings UI and notification
//! surface are injected as capabilities.

pub mod buffer;
pub mod deletion;
pub mod keys;
pub mod orchestrator;
pub mod settings;
pub mod sigv4;
pub mod storage;

pub use buffer::{Position, SharedBuffer, StringBuffer, TextBuffer};
pub use deletion::DeletionEngine;
pub use orchestrator::{PastedImage, UploadOrchestrator};
pub use settings::{ConfigError, JsonSettingsStore, Settings, SettingsStore};
pub use storage::{
    S3Client, S3Config, StorageClient, StorageError, UploadResult, Uploader, UploaderCell,
};

/// Whether an event was intercepted by this plugin. [`Handled::No`] tells the
/// host to fall back to its default behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Yes,
    No,
}

/// User-visible notices: upload failures, per-key delete outcomes and
/// informational no-ops. Implemented by the host; errors never escape past
/// this seam.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Fallback notifier that routes notices into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        log::info!("{}", message);
    }
}
