use chrono::Utc;
use log::debug;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::TextBuffer;
use crate::storage::{Uploader, UploaderCell};
use crate::{Handled, Notifier};

/// One image payload extracted from a paste event.
#[derive(Debug, Clone)]
pub struct PastedImage {
    pub bytes: Vec<u8>,
    /// Source filename when the host knows it; drives the key extension.
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Transient marker inserted at the cursor while an upload is in flight.
/// `%%...%%` is comment syntax in the host editor, so the live preview never
/// renders it as an image, and millis + random suffix keep concurrent pastes
/// distinct.
fn placeholder_token() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("%%uploading-{}-{:08x}%%", millis, suffix)
}

/// Host-native local-embed syntax that may appear alongside an intercepted
/// paste, e.g. `![[Pasted image 20240101.png]]`.
fn residual_embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"!\[\[Pasted image [^\[\]]*\.(?i:png|jpg|jpeg|gif|webp|svg)\]\]")
            .expect("valid residual embed regex")
    })
}

// ── Upload orchestrator ────────────────────────────────────────────────────

/// Owns the paste-event lifecycle: placeholder insertion, upload dispatch,
/// success/failure text reconciliation, residual-artifact cleanup.
pub struct UploadOrchestrator<N: Notifier> {
    cell: Arc<UploaderCell>,
    notifier: N,
}

impl<N: Notifier> UploadOrchestrator<N> {
    pub fn new(cell: Arc<UploaderCell>, notifier: N) -> Self {
        Self { cell, notifier }
    }

    /// Handle one paste event. Returns [`Handled::No`] when no uploader is
    /// configured or the event carries no images, in which case the host's
    /// default paste behavior should apply.
    ///
    /// Images are processed strictly sequentially: each one is fully
    /// reconciled (replaced or rolled back) before the next upload starts, so
    /// placeholder search-and-replace never races a sibling upload. The
    /// buffer lock is only held for individual edits, never across an await,
    /// and the user may edit freely while uploads are pending.
    pub async fn handle_paste<B: TextBuffer>(
        &self,
        buffer: &Mutex<B>,
        images: Vec<PastedImage>,
    ) -> Handled {
        let Some(uploader) = self.cell.current() else {
            debug!("paste not intercepted: uploader not configured");
            return Handled::No;
        };
        if images.is_empty() {
            return Handled::No;
        }

        for image in images {
            self.upload_one(&uploader, buffer, image).await;
        }
        Handled::Yes
    }

    async fn upload_one<B: TextBuffer>(
        &self,
        uploader: &Uploader,
        buffer: &Mutex<B>,
        image: PastedImage,
    ) {
        let token = placeholder_token();
        {
            let mut buffer = buffer.lock().expect("buffer lock");
            buffer.insert_at_cursor(&token);
        }

        // The buffer is editable while this await is pending; only the token
        // string is trusted afterwards, never the insertion offset.
        let result = uploader
            .upload(
                image.bytes,
                image.filename.as_deref(),
                image.content_type.as_deref(),
            )
            .await;

        let mut buffer = buffer.lock().expect("buffer lock");
        match result {
            Ok(result) => reconcile_success(&mut *buffer, &token, &result.url),
            Err(e) => {
                rollback_placeholder(&mut *buffer, &token);
                self.notifier.notify(&format!("Image upload failed: {}", e));
            }
        }
    }
}

/// Replace the placeholder with the final image reference. The token is
/// re-located by content search in the current text; a vanished token means
/// the user deleted it, which is not an error. If the cursor sat exactly at
/// the end of the token it follows to the end of the inserted reference.
fn reconcile_success<B: TextBuffer>(buffer: &mut B, token: &str, url: &str) {
    let text = buffer.text();
    let Some(start) = text.find(token) else {
        debug!("placeholder vanished before upload finished, skipping rewrite");
        return;
    };
    let end = start + token.len();
    let reference = format!("![]({})", url);

    let cursor_at_token_end = buffer.cursor() == end;
    buffer.replace_range(start, end, &reference);
    if cursor_at_token_end {
        buffer.set_cursor(start + reference.len());
    }

    strip_residual_embeds(buffer);
}

/// Remove every host-native embed artifact, re-scanning from the top after
/// each removal since offsets shift. Terminates because every iteration
/// strictly removes text.
fn strip_residual_embeds<B: TextBuffer>(buffer: &mut B) {
    loop {
        let text = buffer.text();
        let Some(m) = residual_embed_regex().find(&text) else {
            break;
        };
        buffer.replace_range(m.start(), m.end(), "");
    }
}

/// Failure path: drop the first occurrence of the token and park the cursor
/// at the end of the document. Nothing was uploaded, so there is no remote
/// cleanup to do.
fn rollback_placeholder<B: TextBuffer>(buffer: &mut B, token: &str) {
    let text = buffer.text();
    if let Some(start) = text.find(token) {
        buffer.replace_range(start, start + token.len(), "");
    }
    buffer.set_cursor_to_end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StringBuffer;
    use crate::storage::{StorageClient, StorageError};
    use async_trait::async_trait;
    use reqwest::StatusCode;

    #[derive(Default)]
    struct FakeStorage {
        fail_puts: bool,
        puts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put(
            &self,
            key: &str,
            _body: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), StorageError> {
            if self.fail_puts {
                return Err(StorageError::UnexpectedStatus(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    key.to_string(),
                ));
            }
            self.puts.lock().unwrap().push(key.to_string());
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        fn presign(&self, key: &str, _expires_secs: u64) -> String {
            format!("https://fake/{}?signed", key)
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://fake/{}", key)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: std::sync::Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn orchestrator(fail_puts: bool) -> UploadOrchestrator<RecordingNotifier> {
        let cell = Arc::new(UploaderCell::new());
        cell.install(Uploader::new(
            Arc::new(FakeStorage {
                fail_puts,
                ..FakeStorage::default()
            }),
            "img",
            false,
            3600,
        ));
        UploadOrchestrator::new(cell, RecordingNotifier::default())
    }

    fn png(name: &str) -> PastedImage {
        PastedImage {
            bytes: vec![1, 2, 3],
            filename: Some(name.to_string()),
            content_type: Some("image/png".to_string()),
        }
    }

    #[tokio::test]
    async fn test_paste_without_uploader_is_not_intercepted() {
        let cell = Arc::new(UploaderCell::new());
        let orchestrator = UploadOrchestrator::new(cell, RecordingNotifier::default());
        let buffer = Mutex::new(StringBuffer::new("abc"));

        let handled = orchestrator.handle_paste(&buffer, vec![png("a.png")]).await;
        assert!(matches!(handled, Handled::No));
        assert_eq!(buffer.lock().unwrap().text(), "abc");
    }

    #[tokio::test]
    async fn test_two_images_become_two_references_in_order() {
        let orchestrator = orchestrator(false);
        let buffer = Mutex::new(StringBuffer::with_cursor("note: ", 6));

        let handled = orchestrator
            .handle_paste(&buffer, vec![png("a.png"), png("b.png")])
            .await;
        assert!(matches!(handled, Handled::Yes));

        let text = buffer.lock().unwrap().text();
        assert_eq!(text.matches("![](https://fake/img/").count(), 2);
        assert!(!text.contains("%%uploading"));
        assert!(orchestrator.notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_lands_after_reference() {
        let orchestrator = orchestrator(false);
        let buffer = Mutex::new(StringBuffer::with_cursor("abc", 3));

        orchestrator.handle_paste(&buffer, vec![png("a.png")]).await;

        let buffer = buffer.lock().unwrap();
        let text = buffer.text();
        assert!(text.starts_with("abc![](https://fake/img/"));
        assert!(text.ends_with(')'));
        assert_eq!(buffer.cursor(), text.len());
    }

    #[tokio::test]
    async fn test_failed_upload_rolls_back_and_notifies() {
        let orchestrator = orchestrator(true);
        let buffer = Mutex::new(StringBuffer::with_cursor("abc", 3));

        let handled = orchestrator.handle_paste(&buffer, vec![png("a.png")]).await;
        assert!(matches!(handled, Handled::Yes));

        let buffer = buffer.lock().unwrap();
        assert_eq!(buffer.text(), "abc");
        assert_eq!(buffer.cursor(), 3);

        let messages = orchestrator.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Image upload failed"));
    }

    #[test]
    fn test_placeholders_are_distinct_within_one_millisecond() {
        let a = placeholder_token();
        let b = placeholder_token();
        assert_ne!(a, b);
        assert!(a.starts_with("%%uploading-") && a.ends_with("%%"));
    }

    #[test]
    fn test_reconcile_skips_vanished_token() {
        let mut buffer = StringBuffer::new("user deleted the marker");
        reconcile_success(&mut buffer, "%%uploading-1-00000000%%", "https://u");
        assert_eq!(buffer.text(), "user deleted the marker");
    }

    #[test]
    fn test_reconcile_cursor_rule_only_at_token_end() {
        let token = "%%uploading-1-00000000%%";

        // Cursor exactly at token end follows the replacement.
        let mut buffer = StringBuffer::new(&format!("abc{}", token));
        buffer.set_cursor(3 + token.len());
        reconcile_success(&mut buffer, token, "u");
        assert_eq!(buffer.text(), "abc![](u)");
        assert_eq!(buffer.cursor(), "abc![](u)".len());

        // Cursor elsewhere stays put.
        let mut buffer = StringBuffer::new(&format!("abc{}", token));
        buffer.set_cursor(1);
        reconcile_success(&mut buffer, token, "u");
        assert_eq!(buffer.cursor(), 1);
    }

    #[test]
    fn test_strip_residual_embeds_removes_all_matches() {
        let mut buffer =
            StringBuffer::new("![[Pasted image 1.png]]x![[Pasted image 2.jpg]]");
        strip_residual_embeds(&mut buffer);
        assert_eq!(buffer.text(), "x");
    }

    #[test]
    fn test_strip_residual_embeds_ignores_other_syntax() {
        let mut buffer = StringBuffer::new("![](https://kept.png) ![[Other embed.png]]");
        strip_residual_embeds(&mut buffer);
        assert_eq!(buffer.text(), "![](https://kept.png) ![[Other embed.png]]");
    }

    #[test]
    fn test_rollback_removes_first_occurrence_and_parks_cursor() {
        let token = "%%uploading-1-00000000%%";
        let mut buffer = StringBuffer::new(&format!("a{}b{}", token, token));
        rollback_placeholder(&mut buffer, token);
        assert_eq!(buffer.text(), format!("ab{}", token));
        assert_eq!(buffer.cursor(), buffer.text().len());
    }
}
