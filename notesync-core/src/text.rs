//! # Text reconciliation
//!
//! Keeps a note's prose buffer responsive to local typing while folding in
//! remote updates with a best-effort heuristic:
//!
//! ```text
//! remote update ──► self-origin / echo? ──yes──► ignore
//!                        │ no
//!                        ▼
//!                 editor focused? ──no──► replace wholesale
//!                        │ yes
//!                        ▼
//!        |lines(local) - lines(remote)| > threshold? ──yes──► replace wholesale
//!                        │ no
//!                        ▼
//!                  keep local, defer
//! ```
//!
//! Overlapping concurrent edits can drop either side's content. This is an
//! accepted limitation, not an attempt at OT or CRDT merging.

use std::time::{Duration, Instant};

use crate::{
    current_timestamp, Broadcaster, Debouncer, DocumentId, EchoGuard, SessionId, TextUpdate,
    WireEvent, DEFAULT_STRUCTURAL_LINE_THRESHOLD, DEFAULT_TEXT_DEBOUNCE_MS,
};

/// What happened to an inbound text update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    /// Update addressed to another document.
    OtherDocument,
    /// This session sent it.
    SelfOrigin,
    /// Payload matches the last emitted digest.
    Echo,
    /// Local buffer replaced; cursor remapped to `cursor`.
    Replaced {
        /// Remapped cursor position.
        cursor: usize,
    },
    /// Local buffer kept while the user is typing.
    Deferred,
}

/// Content to persist after a debounced emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Document to update.
    pub document_id: DocumentId,
    /// Full content.
    pub content: String,
}

/// Local prose state for one document.
#[derive(Debug)]
pub struct TextReconciler {
    document_id: DocumentId,
    self_id: SessionId,
    buffer: String,
    cursor: usize,
    focused: bool,
    structural_threshold: usize,
    echo: EchoGuard,
    debounce: Debouncer<()>,
}

impl TextReconciler {
    /// Create a reconciler seeded with the stored content.
    #[must_use]
    pub fn new(document_id: DocumentId, self_id: SessionId, initial: impl Into<String>) -> Self {
        Self {
            document_id,
            self_id,
            buffer: initial.into(),
            cursor: 0,
            focused: false,
            structural_threshold: DEFAULT_STRUCTURAL_LINE_THRESHOLD,
            echo: EchoGuard::new(),
            debounce: Debouncer::new(Duration::from_millis(DEFAULT_TEXT_DEBOUNCE_MS)),
        }
    }

    /// Override the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Debouncer::new(window);
        self
    }

    /// Override the structural line threshold.
    #[must_use]
    pub const fn with_structural_threshold(mut self, lines: usize) -> Self {
        self.structural_threshold = lines;
        self
    }

    /// Record a local edit and schedule its emission.
    pub fn on_local_change(&mut self, new_text: impl Into<String>, cursor: usize, now: Instant) {
        self.buffer = new_text.into();
        self.cursor = cursor.min(char_len(&self.buffer));
        self.debounce.schedule((), now);
    }

    /// Insert `text` at the cursor and schedule its emission.
    pub fn insert_at_cursor(&mut self, text: &str, now: Instant) {
        let at = byte_offset(&self.buffer, self.cursor);
        self.buffer.insert_str(at, text);
        self.cursor += char_len(text);
        self.debounce.schedule((), now);
    }

    /// Emit the buffer if the debounce window has elapsed.
    ///
    /// Returns the write the caller should persist.
    pub fn poll(&mut self, now: Instant, sink: &dyn Broadcaster) -> Option<PendingWrite> {
        self.debounce.fire(now)?;
        Some(self.emit(sink))
    }

    /// Emit any pending edit immediately.
    pub fn flush(&mut self, sink: &dyn Broadcaster) -> Option<PendingWrite> {
        self.debounce.flush()?;
        Some(self.emit(sink))
    }

    fn emit(&mut self, sink: &dyn Broadcaster) -> PendingWrite {
        let update = TextUpdate {
            document_id: self.document_id,
            content: self.buffer.clone(),
            originator_session_id: self.self_id,
            timestamp: current_timestamp(),
        };
        self.echo.record(update.digest());
        tracing::debug!(
            document_id = %self.document_id,
            digest = %update.digest(),
            len = self.buffer.len(),
            "Emitting text update"
        );
        sink.broadcast(WireEvent::TextUpdate(update));
        PendingWrite {
            document_id: self.document_id,
            content: self.buffer.clone(),
        }
    }

    /// Fold in an inbound text update.
    pub fn on_remote(&mut self, update: &TextUpdate) -> TextOutcome {
        if update.document_id != self.document_id {
            return TextOutcome::OtherDocument;
        }
        if update.originator_session_id == self.self_id {
            return TextOutcome::SelfOrigin;
        }
        if self.echo.is_echo(update.digest()) {
            tracing::trace!(document_id = %self.document_id, "Dropping text echo");
            return TextOutcome::Echo;
        }

        if self.focused {
            let local_lines = line_count(&self.buffer);
            let remote_lines = line_count(&update.content);
            if local_lines.abs_diff(remote_lines) <= self.structural_threshold {
                tracing::debug!(
                    document_id = %self.document_id,
                    local_lines,
                    remote_lines,
                    "Deferring remote text while editor is focused"
                );
                return TextOutcome::Deferred;
            }
        }

        let old_len = char_len(&self.buffer);
        self.buffer.clone_from(&update.content);
        let new_len = char_len(&self.buffer);
        self.cursor = remap_cursor(self.cursor, old_len, new_len);
        self.debounce.cancel();
        TextOutcome::Replaced {
            cursor: self.cursor,
        }
    }

    /// Set whether the editing surface has focus.
    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    /// Whether the editing surface has focus.
    #[must_use]
    pub const fn is_focused(&self) -> bool {
        self.focused
    }

    /// Current buffer.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Cursor as a character offset.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// When the pending emission is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Drop the pending emission.
    pub fn cancel_pending(&mut self) -> bool {
        self.debounce.cancel()
    }

    /// Document this reconciler tracks.
    #[must_use]
    pub const fn document_id(&self) -> DocumentId {
        self.document_id
    }
}

/// Remap a cursor proportionally after the buffer length changed.
///
/// `floor(cursor / max(1, old_len) * new_len)`, clamped to `[0, new_len]`.
#[must_use]
pub fn remap_cursor(cursor: usize, old_len: usize, new_len: usize) -> usize {
    let scaled = cursor as u128 * new_len as u128 / old_len.max(1) as u128;
    usize::try_from(scaled).map_or(new_len, |pos| pos.min(new_len))
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}
