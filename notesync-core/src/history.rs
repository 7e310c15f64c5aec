//! Bounded, branch-discarding undo/redo history of scene snapshots.
//!
//! History is local to one editing session. It is never synchronized and is
//! dropped together with the editor.

use std::collections::VecDeque;

use crate::{ReentrancyGuard, SceneSnapshot, DEFAULT_HISTORY_CAPACITY};

/// Undo/redo stack with a current pointer.
///
/// Entries after the pointer are reachable only through redo; a fresh push
/// discards them.
#[derive(Debug)]
pub struct HistoryManager {
    stack: VecDeque<SceneSnapshot>,
    pointer: Option<usize>,
    capacity: usize,
    undo_redoing: ReentrancyGuard,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryManager {
    /// Create an empty history holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            stack: VecDeque::with_capacity(capacity),
            pointer: None,
            capacity,
            undo_redoing: ReentrancyGuard::new(),
        }
    }

    /// Record a new state, discarding any redo branch.
    ///
    /// Ignored while an undo/redo load is in progress. Also ignored when
    /// `snapshot` equals the current entry: a surface that re-reports the
    /// state it was just loaded with after an undo is not a new edit, and
    /// recording it would discard the redo branch. Returns whether the
    /// entry was recorded.
    pub fn push(&mut self, snapshot: SceneSnapshot) -> bool {
        if self.undo_redoing.is_active() {
            tracing::trace!("history push ignored during undo/redo");
            return false;
        }
        if self.current() == Some(&snapshot) {
            return false;
        }

        let keep = self.pointer.map_or(0, |p| p + 1);
        self.stack.truncate(keep);
        self.stack.push_back(snapshot);
        if self.stack.len() > self.capacity {
            self.stack.pop_front();
        }
        self.pointer = Some(self.stack.len() - 1);
        true
    }

    /// Step back one entry, handing it to `load` while the guard is held.
    ///
    /// Returns the loaded snapshot, or `None` if there is nothing to undo.
    pub fn undo<F>(&mut self, load: F) -> Option<SceneSnapshot>
    where
        F: FnOnce(&SceneSnapshot),
    {
        let p = self.pointer.filter(|&p| p > 0)?;
        self.step_to(p - 1, load)
    }

    /// Step forward one entry, handing it to `load` while the guard is held.
    ///
    /// Returns the loaded snapshot, or `None` if there is nothing to redo.
    pub fn redo<F>(&mut self, load: F) -> Option<SceneSnapshot>
    where
        F: FnOnce(&SceneSnapshot),
    {
        let p = self.pointer.filter(|&p| p + 1 < self.stack.len())?;
        self.step_to(p + 1, load)
    }

    fn step_to<F>(&mut self, target: usize, load: F) -> Option<SceneSnapshot>
    where
        F: FnOnce(&SceneSnapshot),
    {
        let snapshot = self.stack.get(target)?.clone();
        let _scope = self.undo_redoing.enter()?;
        self.pointer = Some(target);
        load(&snapshot);
        Some(snapshot)
    }

    /// Whether an earlier entry exists.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.pointer.is_some_and(|p| p > 0)
    }

    /// Whether a later entry exists.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.pointer.is_some_and(|p| p + 1 < self.stack.len())
    }

    /// The entry at the pointer.
    #[must_use]
    pub fn current(&self) -> Option<&SceneSnapshot> {
        self.pointer.and_then(|p| self.stack.get(p))
    }

    /// Current pointer, `None` when empty.
    #[must_use]
    pub const fn pointer(&self) -> Option<usize> {
        self.pointer
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handle on the undo/redo guard, for mutation handlers outside the manager.
    #[must_use]
    pub fn guard(&self) -> ReentrancyGuard {
        self.undo_redoing.clone()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.pointer = None;
    }
}
