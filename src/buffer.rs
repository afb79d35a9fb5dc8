use std::sync::{Arc, Mutex};

// ── Position coordinates ───────────────────────────────────────────────────

/// Line/column coordinates into a text buffer. Lines split on '\n', columns
/// count UTF-8 bytes within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Convert a byte offset into line/column coordinates. Offsets past the end
/// of the text clamp to the final position.
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line = before.matches('\n').count();
    let column = match before.rfind('\n') {
        Some(nl) => offset - nl - 1,
        None => offset,
    };
    Position { line, column }
}

/// Convert line/column coordinates back into a byte offset. Out-of-range
/// lines clamp to the end of the text; out-of-range columns clamp to the end
/// of the line.
pub fn position_to_offset(text: &str, position: Position) -> usize {
    let mut start = 0usize;
    for _ in 0..position.line {
        match text[start..].find('\n') {
            Some(nl) => start += nl + 1,
            None => return text.len(),
        }
    }
    let line_end = text[start..]
        .find('\n')
        .map(|nl| start + nl)
        .unwrap_or(text.len());
    (start + position.column).min(line_end)
}

// ── TextBuffer capability ──────────────────────────────────────────────────

/// Host editor seam: a shared mutable document with a cursor. All offsets are
/// UTF-8 byte offsets into the current text. Implementations are expected to
/// keep the cursor on a char boundary after every edit.
pub trait TextBuffer {
    /// Snapshot of the full document text.
    fn text(&self) -> String;

    /// Replace the whole document in one edit.
    fn set_text(&mut self, text: String);

    /// Replace the byte span `start..end` with `replacement`.
    fn replace_range(&mut self, start: usize, end: usize, replacement: &str);

    fn cursor(&self) -> usize;

    fn set_cursor(&mut self, offset: usize);

    /// Insert text at the cursor and leave the cursor after it.
    fn insert_at_cursor(&mut self, text: &str);

    /// Index and content (without trailing newline) of the line under the
    /// cursor.
    fn cursor_line(&self) -> (usize, String);

    /// Replace the content of line `index`, keeping its newline. Lines past
    /// the end of the document are ignored.
    fn replace_line(&mut self, index: usize, content: &str);

    fn set_cursor_to_end(&mut self);
}

/// Shared handle to a buffer being edited concurrently. Locks are taken only
/// for the duration of a single edit, never across an await.
pub type SharedBuffer<B> = Arc<Mutex<B>>;

pub fn shared<B: TextBuffer>(buffer: B) -> SharedBuffer<B> {
    Arc::new(Mutex::new(buffer))
}

// ── In-memory implementation ───────────────────────────────────────────────

/// Plain string-backed buffer. Used in tests and by hosts without a native
/// editor buffer. Edits shift the cursor the way an editor would: a cursor at
/// or after a replaced span moves by the length delta, a cursor inside the
/// span lands at the end of the replacement.
#[derive(Debug, Default, Clone)]
pub struct StringBuffer {
    text: String,
    cursor: usize,
}

impl StringBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: 0,
        }
    }

    pub fn with_cursor(text: &str, cursor: usize) -> Self {
        let mut buffer = Self::new(text);
        buffer.set_cursor(cursor);
        buffer
    }

    fn clamp_offset(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    fn line_span(&self, index: usize) -> Option<(usize, usize)> {
        let mut start = 0usize;
        for _ in 0..index {
            start += self.text[start..].find('\n')? + 1;
        }
        if start > self.text.len() {
            return None;
        }
        let end = self.text[start..]
            .find('\n')
            .map(|nl| start + nl)
            .unwrap_or(self.text.len());
        Some((start, end))
    }
}

impl TextBuffer for StringBuffer {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn set_text(&mut self, text: String) {
        self.text = text;
        self.cursor = self.clamp_offset(self.cursor);
    }

    fn replace_range(&mut self, start: usize, end: usize, replacement: &str) {
        let start = self.clamp_offset(start);
        let end = self.clamp_offset(end.max(start));
        self.text.replace_range(start..end, replacement);

        if self.cursor >= end {
            self.cursor = self.cursor - (end - start) + replacement.len();
        } else if self.cursor > start {
            self.cursor = start + replacement.len();
        }
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn set_cursor(&mut self, offset: usize) {
        self.cursor = self.clamp_offset(offset);
    }

    fn insert_at_cursor(&mut self, text: &str) {
        let at = self.cursor;
        self.replace_range(at, at, text);
    }

    fn cursor_line(&self) -> (usize, String) {
        let position = offset_to_position(&self.text, self.cursor);
        let (start, end) = self
            .line_span(position.line)
            .unwrap_or((self.text.len(), self.text.len()));
        (position.line, self.text[start..end].to_string())
    }

    fn replace_line(&mut self, index: usize, content: &str) {
        if let Some((start, end)) = self.line_span(index) {
            self.replace_range(start, end, content);
        }
    }

    fn set_cursor_to_end(&mut self) {
        self.cursor = self.text.len();
    }
}
