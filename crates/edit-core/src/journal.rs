//! Pending-edit journal (the elog).
//!
//! Commands that make many edits reason about *original* addresses: instead
//! of mutating the buffer as they go (which would shift every later offset),
//! they append [`JournalEntry`] records here. When the command completes, the
//! journal is applied highest-offset-first so that every recorded address is
//! still valid at the moment it is used, and the whole journal becomes a
//! single undo step.
//!
//! Entries must describe disjoint ranges; an overlap is a bug in the command
//! that produced them and panics rather than corrupting the buffer.

/// One pending edit, in rune offsets valid at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Insert `text` at `q0`.
    Insert {
        /// Insertion point.
        q0: usize,
        /// Runes to insert.
        text: Vec<char>,
    },
    /// Delete `[q0, q1)`.
    Delete {
        /// Start of the deleted range.
        q0: usize,
        /// Exclusive end of the deleted range.
        q1: usize,
    },
    /// Replace `[q0, q1)` with `text`.
    Replace {
        /// Start of the replaced range.
        q0: usize,
        /// Exclusive end of the replaced range.
        q1: usize,
        /// Replacement runes.
        text: Vec<char>,
    },
}

impl JournalEntry {
    /// Rune offset the entry starts at.
    fn start(&self) -> usize {
        match self {
            JournalEntry::Insert { q0, .. }
            | JournalEntry::Delete { q0, .. }
            | JournalEntry::Replace { q0, .. } => *q0,
        }
    }

    /// Exclusive rune end of the affected pre-edit range (inserts are
    /// zero-width).
    fn end(&self) -> usize {
        match self {
            JournalEntry::Insert { q0, .. } => *q0,
            JournalEntry::Delete { q1, .. } | JournalEntry::Replace { q1, .. } => *q1,
        }
    }
}

/// Ordered list of pending edits for one buffer.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// An empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert of `text` at `q0`.
    pub fn insert(&mut self, q0: usize, text: &[char]) {
        if text.is_empty() {
            return;
        }
        self.entries.push(JournalEntry::Insert {
            q0,
            text: text.to_vec(),
        });
    }

    /// Queue a delete of `[q0, q1)`.
    pub fn delete(&mut self, q0: usize, q1: usize) {
        debug_assert!(q0 <= q1, "inverted journal range");
        if q0 == q1 {
            return;
        }
        self.entries.push(JournalEntry::Delete { q0, q1 });
    }

    /// Queue a replacement of `[q0, q1)` with `text`.
    pub fn replace(&mut self, q0: usize, q1: usize, text: &[char]) {
        debug_assert!(q0 <= q1, "inverted journal range");
        self.entries.push(JournalEntry::Replace {
            q0,
            q1,
            text: text.to_vec(),
        });
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Discard all queued entries (the error path).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drain the journal in application order: stable-sorted by decreasing
    /// start offset, so submission order is preserved between entries at the
    /// same offset.
    ///
    /// # Panics
    ///
    /// Panics if any two entries overlap.
    pub(crate) fn take_sorted(&mut self) -> Vec<JournalEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| b.start().cmp(&a.start()));
        for pair in entries.windows(2) {
            assert!(
                pair[1].end() <= pair[0].start(),
                "journal entries overlap: {:?} and {:?}",
                pair[1],
                pair[0]
            );
        }
        entries
    }
}
