use futures::future::join_all;
use log::{debug, info};
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::TextBuffer;
use crate::keys;
use crate::storage::UploaderCell;
use crate::{Handled, Notifier};

/// Markdown image directive with a URL or key target: `![alt](target)`.
fn image_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(([^()\s]+)\)").expect("valid image ref regex"))
}

// ── Reference deletion engine ──────────────────────────────────────────────

/// Maps image references in the document back to storage keys, issues remote
/// deletes, and strips the corresponding text. Text removal proceeds even
/// when a remote delete fails; the failure is always reported per key so the
/// reference is never silently lost.
pub struct DeletionEngine<N: Notifier> {
    cell: Arc<UploaderCell>,
    notifier: N,
}

impl<N: Notifier> DeletionEngine<N> {
    pub fn new(cell: Arc<UploaderCell>, notifier: N) -> Self {
        Self { cell, notifier }
    }

    /// Whether the delete actions should be offered at all.
    pub fn is_available(&self) -> bool {
        self.cell.is_configured()
    }

    /// Delete the first image reference on the line under the cursor. No
    /// reference on the line is a silent no-op.
    pub async fn delete_on_line<B: TextBuffer>(&self, buffer: &Mutex<B>) -> Handled {
        let Some(uploader) = self.cell.current() else {
            return Handled::No;
        };

        let (line_index, line) = {
            let buffer = buffer.lock().expect("buffer lock");
            buffer.cursor_line()
        };
        let Some(captures) = image_ref_regex().captures(&line) else {
            debug!("no image reference on line {}", line_index);
            return Handled::No;
        };
        let matched = captures.get(0).expect("whole match").as_str().to_string();
        let target = captures.get(1).expect("target group").as_str();
        let key = keys::parse_key(target);

        match uploader.delete_key(&key).await {
            Ok(()) => self.notifier.notify(&format!("Deleted {} from bucket", key)),
            Err(e) => self
                .notifier
                .notify(&format!("Failed to delete {}: {}", key, e)),
        }

        // Re-read the line after the await: offsets from before the network
        // call are stale. The reference is re-located by content on the same
        // line; if the user already removed it there is nothing left to do.
        // Lines split on '\n' only, same convention as the buffer, so a
        // trailing '\r' stays part of the line content.
        let mut buffer = buffer.lock().expect("buffer lock");
        let current = buffer.text();
        let line_content = current.split('\n').nth(line_index).map(str::to_string);
        if let Some(line_content) = line_content {
            if line_content.contains(&matched) {
                buffer.replace_line(line_index, &line_content.replacen(&matched, "", 1));
            }
        }
        Handled::Yes
    }

    /// Delete every image reference in the document. Remote deletes run as an
    /// unordered concurrent batch; the buffer is rewritten once after all of
    /// them settle, so the text edit is atomic from the user's perspective.
    pub async fn delete_all<B: TextBuffer>(&self, buffer: &Mutex<B>) -> Handled {
        let Some(uploader) = self.cell.current() else {
            return Handled::No;
        };

        let text = {
            let buffer = buffer.lock().expect("buffer lock");
            buffer.text()
        };
        let targets: Vec<String> = image_ref_regex()
            .captures_iter(&text)
            .map(|captures| keys::parse_key(captures.get(1).expect("target group").as_str()))
            .collect();
        if targets.is_empty() {
            self.notifier.notify("No images found in this note");
            return Handled::Yes;
        }

        info!("deleting {} remote objects", targets.len());
        let results = join_all(targets.iter().map(|key| uploader.delete_key(key))).await;

        let mut failures = 0usize;
        for (key, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                self.notifier
                    .notify(&format!("Failed to delete {}: {}", key, e));
            }
        }

        // Single rewrite against the current text, not the snapshot scanned
        // above.
        {
            let mut buffer = buffer.lock().expect("buffer lock");
            let current = buffer.text();
            let stripped = image_ref_regex().replace_all(&current, "").into_owned();
            buffer.set_text(stripped);
        }

        self.notifier.notify(&format!(
            "Removed {} image reference(s), {} remote delete(s) failed",
            targets.len(),
            failures
        ));
        Handled::Yes
    }
}
