//! Observable editable buffer.
//!
//! [`ObservableBuffer`] is the model every view shares: it owns one
//! [`PieceTable`] plus its [`RuneIndex`], a set of observers, the pending
//! edit [`Journal`], and the identity of the backing file (name, on-disk
//! hash, stat info, scratch/directory classification).
//!
//! # Overview
//!
//! Observers implement the two-method [`BufferObserver`] contract and are
//! notified synchronously, inside the mutating call, after the edit is
//! visible in the buffer. All observers see the same event sequence; the
//! order *among* observers is unspecified. One observer is designated
//! "current" and supplies the dot for address arithmetic.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use edit_core::{ObservableBuffer, View};
//!
//! let mut buffer = ObservableBuffer::with_text("/tmp/notes", "hello\n");
//! let view = Rc::new(RefCell::new(View::new()));
//! buffer.add_observer(view.clone());
//!
//! buffer.insert_at(5, &[',', ' ', 'w', 'o', 'r', 'l', 'd']);
//! assert_eq!(buffer.text(), "hello, world\n");
//! assert_eq!(buffer.size_runes(), 13);
//! ```

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use tracing::debug;

use crate::error::{EditError, Result};
use crate::io::{ContentHash, FileIo, FileInfo};
use crate::journal::{Journal, JournalEntry};
use crate::rune_index::RuneIndex;
use crate::storage::{PieceTable, UndoEvent};

/// File name suffixes that mark a buffer as scratch: saved only on explicit
/// request, and exempt from unsaved-change warnings.
const SLASH_GUIDE: &str = "/guide";
const PLUS_ERRORS: &str = "+Errors";

/// The narrow edge a view presents to its buffer.
///
/// Callbacks run synchronously inside the mutating call, after the edit is
/// applied. Observers must not re-enter the buffer's mutation API from a
/// callback, and must not assume anything about their position in the
/// notification order.
pub trait BufferObserver {
    /// `runes` were inserted at rune offset `q0`.
    fn inserted(&mut self, q0: usize, runes: &[char]);
    /// Runes `[q0, q1)` were deleted.
    fn deleted(&mut self, q0: usize, q1: usize);
}

/// Registration handle for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Shared, interior-mutable observer handle.
pub type SharedObserver = Rc<RefCell<dyn BufferObserver>>;

/// Identity of the backing file.
#[derive(Debug, Default)]
struct DiskDetails {
    name: String,
    hash: Option<ContentHash>,
    info: Option<FileInfo>,
    is_dir: bool,
}

/// A piece-table buffer with observer fan-out and file identity.
pub struct ObservableBuffer {
    table: PieceTable,
    index: RuneIndex,
    observers: Vec<(ObserverId, SharedObserver)>,
    current: Option<ObserverId>,
    next_observer: u64,
    journal: Journal,
    details: DiskDetails,
    is_scratch: bool,
}

impl ObservableBuffer {
    /// Create an empty buffer named `name`.
    pub fn new(name: &str) -> Self {
        Self::with_text(name, "")
    }

    /// Create a buffer named `name` holding `text`.
    pub fn with_text(name: &str, text: &str) -> Self {
        let table = PieceTable::new(text);
        let index = RuneIndex::new(&table);
        let mut buffer = Self {
            table,
            index,
            observers: Vec::new(),
            current: None,
            next_observer: 0,
            journal: Journal::new(),
            details: DiskDetails::default(),
            is_scratch: false,
        };
        buffer.set_name_raw(name);
        buffer
    }

    // --- observers --------------------------------------------------------

    /// Register `observer` and make it current.
    pub fn add_observer(&mut self, observer: SharedObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        self.current = Some(id);
        id
    }

    /// Remove a registered observer. If it was current, any remaining
    /// observer becomes current.
    pub fn remove_observer(&mut self, id: ObserverId) -> Result<()> {
        let position = self
            .observers
            .iter()
            .position(|(oid, _)| *oid == id)
            .ok_or(EditError::UnknownObserver)?;
        self.observers.remove(position);
        if self.current == Some(id) {
            self.current = self.observers.first().map(|(oid, _)| *oid);
        }
        Ok(())
    }

    /// Make a registered observer current.
    pub fn set_current_observer(&mut self, id: ObserverId) {
        if self.observers.iter().any(|(oid, _)| *oid == id) {
            self.current = Some(id);
        }
    }

    /// The current observer's id, if any observer is registered.
    pub fn current_observer(&self) -> Option<ObserverId> {
        self.current
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// True if more than one view shares this buffer.
    pub fn has_multiple_observers(&self) -> bool {
        self.observers.len() > 1
    }

    fn broadcast_inserted(&self, q0: usize, runes: &[char]) {
        for (_, observer) in &self.observers {
            observer.borrow_mut().inserted(q0, runes);
        }
    }

    fn broadcast_deleted(&self, q0: usize, q1: usize) {
        for (_, observer) in &self.observers {
            observer.borrow_mut().deleted(q0, q1);
        }
    }

    // --- reads ------------------------------------------------------------

    /// Complete size in runes, including any uncommitted typing run.
    pub fn size_runes(&self) -> usize {
        self.table.size_runes()
    }

    /// Committed size in bytes.
    pub fn len_bytes(&self) -> usize {
        self.table.len_bytes()
    }

    /// The rune at offset `q`, reading through the typing cache.
    pub fn rune_at(&mut self, q: usize) -> char {
        if self.table.has_uncommitted() {
            return self.table.rune_at(q);
        }
        self.index.rune_at(&self.table, q)
    }

    /// Fill `dst` with committed runes starting at `off`; returns the number
    /// of runes read.
    pub fn read_runes(&self, off: usize, dst: &mut [char]) -> usize {
        self.table.read_runes(off, dst)
    }

    /// Committed contents of `[q0, q1)` as a `String`.
    pub fn text_range(&self, q0: usize, q1: usize) -> String {
        self.table.slice_string(q0, q1)
    }

    /// Full committed contents as a `String`.
    pub fn text(&self) -> String {
        self.table.text()
    }

    /// Full committed contents as bytes (for hashing and external writes).
    pub fn bytes(&self) -> Vec<u8> {
        self.table.bytes()
    }

    // --- mutation surface -------------------------------------------------

    /// Insert `runes` at rune offset `q0` and broadcast to every observer.
    ///
    /// # Panics
    ///
    /// Panics if `q0` is past the end of the buffer or a typing run is
    /// pending.
    pub fn insert_at(&mut self, q0: usize, runes: &[char]) {
        assert!(
            !self.table.has_uncommitted(),
            "insert_at with a pending typing run"
        );
        assert!(q0 <= self.table.len_runes(), "insert past end of buffer");
        if runes.is_empty() {
            return;
        }
        let text: String = runes.iter().collect();
        let byte_off = self.index.byte_of_rune(&self.table, q0);
        self.table
            .insert_bytes(byte_off, q0, text.as_bytes(), runes.len());
        self.index
            .did_insert(&self.table, byte_off, text.len(), runes.len());
        self.broadcast_inserted(q0, runes);
    }

    /// Delete runes `[q0, q1)` and broadcast to every observer.
    ///
    /// # Panics
    ///
    /// Panics if the range is invalid or a typing run is pending.
    pub fn delete_at(&mut self, q0: usize, q1: usize) {
        assert!(
            q0 <= q1 && q1 <= self.table.len_runes(),
            "delete range outside buffer"
        );
        assert!(
            !self.table.has_uncommitted(),
            "delete_at with a pending typing run"
        );
        if q0 == q1 {
            return;
        }
        let b0 = self.index.byte_of_rune(&self.table, q0);
        let b1 = self.index.byte_of_rune(&self.table, q1);
        self.table.delete_bytes(b0, b1 - b0, q0, q1 - q0);
        self.index.did_delete(&self.table, b0, b1 - b0, q0, q1 - q0);
        self.broadcast_deleted(q0, q1);
    }

    /// Append `runes` to the uncommitted typing run at `q0` (which must
    /// continue the run) and broadcast so views repaint. The piece table is
    /// untouched until the next [`ObservableBuffer::commit`].
    pub fn insert_at_without_commit(&mut self, q0: usize, runes: &[char]) {
        self.table.cache_insert(q0, runes);
        self.broadcast_inserted(q0, runes);
    }

    /// Open an undo point stamped `seq`. Edits across buffers that share a
    /// `seq` undo together.
    pub fn mark(&mut self, seq: u64) {
        self.table.mark(seq);
    }

    /// Seal the typing run and any pending changes into one undo step.
    pub fn commit(&mut self) -> Option<(u64, isize)> {
        self.table.commit()
    }

    /// Undo (`is_undo`) or redo one commit, broadcasting each reversed
    /// change to the observers. Returns the post-inversion dot, or `None` if
    /// there was nothing to do.
    pub fn undo(&mut self, is_undo: bool) -> Option<(usize, usize)> {
        let summary = if is_undo {
            self.table.undo()
        } else {
            self.table.redo()
        }?;
        // The event offsets describe the intermediate states the inversions
        // ran in; rebuilding the cursor once is both simpler and correct.
        self.index = RuneIndex::new(&self.table);
        for event in &summary.events {
            match event {
                UndoEvent::Inserted { q0, text } => {
                    self.broadcast_inserted(*q0, text);
                }
                UndoEvent::Deleted { q0, q1 } => {
                    self.broadcast_deleted(*q0, *q1);
                }
                UndoEvent::Renamed { name } => {
                    let name = name.clone();
                    self.set_name_raw(&name);
                }
            }
        }
        Some((summary.q0, summary.q1))
    }

    // --- journal ----------------------------------------------------------

    /// The pending edit journal for this buffer.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Mutable access to the pending edit journal.
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Apply every queued journal entry in descending-offset order, then
    /// commit the whole batch as one undo step. Returns what
    /// [`ObservableBuffer::commit`] returned.
    pub fn apply_journal(&mut self) -> Option<(u64, isize)> {
        let entries = self.journal.take_sorted();
        if entries.is_empty() {
            return None;
        }
        debug!(target: "buffer.journal", name = %self.details.name, entries = entries.len(), "apply");
        for entry in entries {
            match entry {
                JournalEntry::Insert { q0, text } => self.insert_at(q0, &text),
                JournalEntry::Delete { q0, q1 } => self.delete_at(q0, q1),
                JournalEntry::Replace { q0, q1, text } => {
                    self.delete_at(q0, q1);
                    self.insert_at(q0, &text);
                }
            }
        }
        self.commit()
    }

    // --- undo bookkeeping forwards ---------------------------------------

    /// Sequence number of the most recent undoable commit, or 0.
    pub fn top_seq(&self) -> u64 {
        self.table.top_seq()
    }

    /// Sequence number of the most recent redoable commit, or 0.
    pub fn redo_seq(&self) -> u64 {
        self.table.redo_seq()
    }

    /// Sequence number stamped by the latest [`ObservableBuffer::mark`].
    pub fn seq(&self) -> u64 {
        self.table.seq()
    }

    /// True if a typing run is pending.
    pub fn has_uncommitted(&self) -> bool {
        self.table.has_uncommitted()
    }

    /// True if there is anything to undo.
    pub fn has_undoable(&self) -> bool {
        self.table.has_undoable()
    }

    /// True if there is anything to redo.
    pub fn has_redoable(&self) -> bool {
        self.table.has_redoable()
    }

    /// Drop all undo history; the current contents become the initial state.
    pub fn reset(&mut self) {
        self.table.reset();
    }

    // --- dirtiness --------------------------------------------------------

    /// True if the buffer differs from its last clean mark.
    pub fn dirty(&self) -> bool {
        self.table.dirty()
    }

    /// Mark the buffer clean: the backing now matches the contents.
    pub fn clean(&mut self) {
        self.table.clean();
    }

    /// Suppress the next unsaved-change warning without clearing dirtiness.
    pub fn set_treat_as_clean(&mut self) {
        self.table.set_treat_as_clean();
    }

    /// True if destructive operations should warn about this buffer.
    pub fn treat_as_dirty(&self) -> bool {
        self.table.treat_as_dirty()
    }

    /// Note that the backing differs from the contents without editing.
    pub fn set_modded(&mut self) {
        self.table.set_modded();
    }

    /// True if this buffer is worth writing and has unsaved changes: it has
    /// a name, has been modified, and is not a directory or scratch buffer.
    pub fn saveable_and_dirty(&self) -> bool {
        !self.details.name.is_empty()
            && (self.table.modded() || self.table.dirty() || self.table.has_uncommitted())
            && !self.is_dir_or_scratch()
    }

    // --- file identity ----------------------------------------------------

    /// The buffer's file name.
    pub fn name(&self) -> &str {
        &self.details.name
    }

    /// Rename the buffer. While an undo point is open the rename is recorded
    /// so that undo restores the previous name. Scratch classification is
    /// recomputed from the new name.
    pub fn set_name(&mut self, name: &str) {
        if self.details.name == name {
            return;
        }
        let previous = self.details.name.clone();
        self.table.record_rename(&previous, name);
        self.set_name_raw(name);
    }

    fn set_name_raw(&mut self, name: &str) {
        self.details.name = name.to_string();
        self.is_scratch = name.ends_with(SLASH_GUIDE) || name.ends_with(PLUS_ERRORS);
    }

    /// True if this buffer is a scratch buffer (`…/guide` or `…+Errors`).
    pub fn is_scratch(&self) -> bool {
        self.is_scratch
    }

    /// True if this buffer holds a synthesized directory listing.
    pub fn is_dir(&self) -> bool {
        self.details.is_dir
    }

    /// Record whether this buffer holds a directory listing.
    pub fn set_dir(&mut self, is_dir: bool) {
        self.details.is_dir = is_dir;
    }

    /// True if the buffer is a directory listing or scratch buffer.
    pub fn is_dir_or_scratch(&self) -> bool {
        self.is_scratch || self.details.is_dir
    }

    /// The remembered on-disk content hash, if one was recorded.
    pub fn hash(&self) -> Option<ContentHash> {
        self.details.hash
    }

    /// Remember `hash` as the on-disk content hash.
    pub fn set_hash(&mut self, hash: ContentHash) {
        self.details.hash = Some(hash);
    }

    /// The remembered stat info, if any.
    pub fn info(&self) -> Option<&FileInfo> {
        self.details.info.as_ref()
    }

    /// Refresh the remembered stat info to `info`, but only if the current
    /// on-disk contents of `path` still hash to the remembered value — that
    /// is, only when the backing still matches what was loaded.
    pub fn update_info(
        &mut self,
        path: &str,
        info: FileInfo,
        io: &mut dyn FileIo,
    ) -> Result<()> {
        let hash = io.hash_file(path)?;
        if self.details.hash == Some(hash) {
            self.details.info = Some(info);
        }
        Ok(())
    }

    /// Read all of `reader` into the buffer at `q0`, eliding NUL runes, and
    /// drop the undo history so the loaded state is the initial state. When
    /// `set_hash` is set the hash of the raw bytes is remembered for later
    /// [`ObservableBuffer::update_info`] coherence checks.
    ///
    /// Returns the number of runes inserted and whether NULs were elided.
    pub fn load<R: Read>(&mut self, q0: usize, mut reader: R, set_hash: bool) -> Result<(usize, bool)> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if set_hash {
            self.details.hash = Some(ContentHash::of(&data));
        }
        let (runes, has_nulls) = runes_from_bytes(&data);
        self.insert_at(q0, &runes);
        self.reset();
        self.table.set_modded();
        Ok((runes.len(), has_nulls))
    }
}

/// Decode raw bytes into runes, eliding NULs and substituting the
/// replacement rune for invalid UTF-8. Returns the runes and whether any
/// NULs were dropped.
pub(crate) fn runes_from_bytes(bytes: &[u8]) -> (Vec<char>, bool) {
    let text = String::from_utf8_lossy(bytes);
    let has_nulls = text.contains('\0');
    let runes = text.chars().filter(|&c| c != '\0').collect();
    (runes, has_nulls)
}
