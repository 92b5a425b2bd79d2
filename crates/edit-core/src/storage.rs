//! Piece-table storage layer.
//!
//! Implements the byte storage behind every buffer: an immutable original
//! buffer plus an append-only add buffer, stitched together by a list of
//! [`Piece`]s. Edits splice new pieces in and unlink old ones; nothing is
//! ever overwritten, which is what makes the reversible change log cheap.
//!
//! # Overview
//!
//! - **Read**: rune-indexed access ([`PieceTable::rune_at`],
//!   [`PieceTable::read_runes`]) and full materialization
//!   ([`PieceTable::bytes`]).
//! - **Mutation**: byte-indexed [`PieceTable::insert_bytes`] and
//!   [`PieceTable::delete_bytes`]. Every mutation records a [`Change`] in the
//!   open commit.
//! - **Commit boundary**: [`PieceTable::commit`] seals the open changes into
//!   one undo unit stamped with the externally supplied sequence number.
//! - **Undo/redo**: [`PieceTable::undo`] and [`PieceTable::redo`] restore
//!   byte-exact prior states and report what they did so callers can fan the
//!   events out to observers.
//! - **Cache**: a small rune vector for keystroke-by-keystroke typing that
//!   stays outside the piece list until the next commit folds it into a
//!   single insert change.
//!
//! Offsets at this layer are byte offsets; the rune-addressed surface lives
//! in [`crate::ObservableBuffer`], which pairs a `PieceTable` with a
//! [`crate::RuneIndex`].

use tracing::trace;

/// Identifies which backing buffer a piece points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// The read-only original buffer.
    Original,
    /// The append-only add buffer.
    Add,
}

/// An immutable run of bytes in one of the two backing buffers.
///
/// The concatenation of the live pieces equals the logical buffer contents.
/// Pieces are never modified after creation; edits replace them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Which backing buffer the run lives in.
    pub kind: BufferKind,
    /// Start byte offset in the backing buffer.
    pub start: usize,
    /// Length of the run in bytes.
    pub byte_len: usize,
    /// Length of the run in runes.
    pub rune_len: usize,
}

impl Piece {
    fn new(kind: BufferKind, start: usize, byte_len: usize, rune_len: usize) -> Self {
        Self {
            kind,
            start,
            byte_len,
            rune_len,
        }
    }
}

/// A single logical edit recorded in a commit.
///
/// Structural changes remember the piece-list splice they performed (`index`,
/// `before`, `after`) so that undo can reverse it exactly: the pieces that
/// were unlinked are kept alive inside the change until the commit itself is
/// dropped.
#[derive(Debug, Clone)]
enum Change {
    /// Bytes were inserted at `byte_off`.
    Insert(Splice),
    /// Bytes were deleted starting at `byte_off`.
    Delete(Splice),
    /// The owning buffer was renamed. Kept in the same log so that undoing a
    /// commit also restores the previous name.
    Rename {
        previous: String,
        current: String,
    },
}

/// The recorded geometry of one piece-list splice.
#[derive(Debug, Clone)]
struct Splice {
    /// Piece-list index the splice happened at.
    index: usize,
    /// Pieces that were removed (empty for a boundary insert).
    before: Vec<Piece>,
    /// Pieces that took their place.
    after: Vec<Piece>,
    /// Byte offset of the edit.
    byte_off: usize,
    /// Rune offset of the edit.
    rune_off: usize,
    /// Edited length in bytes.
    byte_len: usize,
    /// Edited length in runes.
    rune_len: usize,
}

/// An atomic group of changes; one commit is one undo step.
#[derive(Debug, Clone)]
struct Commit {
    seq: u64,
    changes: Vec<Change>,
}

/// What a single inverted (or re-applied) change did, reported by
/// [`PieceTable::undo`]/[`PieceTable::redo`] so the owning buffer can
/// broadcast matching observer events.
///
/// Offsets are valid in the intermediate state the change was inverted in,
/// so replaying the events in order reproduces the mutation sequence an
/// observer would have seen. Reinserted text is captured eagerly for the
/// same reason: a later change in the same commit may shift it.
#[derive(Debug, Clone)]
pub enum UndoEvent {
    /// Runes reappeared at `q0` (an undone delete or redone insert).
    Inserted {
        /// Rune offset the text reappeared at.
        q0: usize,
        /// The runes that reappeared.
        text: Vec<char>,
    },
    /// Runes disappeared from `[q0, q1)` (an undone insert or redone delete).
    Deleted {
        /// Rune offset of the removed span.
        q0: usize,
        /// Exclusive rune end of the removed span.
        q1: usize,
    },
    /// The buffer name changed to `name`.
    Renamed {
        /// The name to restore.
        name: String,
    },
}

/// Summary of one undone or redone commit.
#[derive(Debug)]
pub struct CommitSummary {
    /// Sequence number the commit was stamped with.
    pub seq: u64,
    /// Dot start after the inversion (range of the last event applied).
    pub q0: usize,
    /// Dot end after the inversion.
    pub q1: usize,
    /// Net rune count change this inversion produced.
    pub rune_delta: isize,
    /// Per-change events in application order.
    pub events: Vec<UndoEvent>,
}

/// Piece-table storage with a reversible change log and a typing cache.
pub struct PieceTable {
    /// Read-only original contents.
    original: Vec<u8>,
    /// Append-only add buffer.
    add: Vec<u8>,
    /// Live pieces, in document order.
    pieces: Vec<Piece>,
    /// Committed size in bytes.
    byte_size: usize,
    /// Committed size in runes.
    rune_size: usize,

    /// Changes of the commit under construction.
    open: Vec<Change>,
    /// Undoable commits, most recent last.
    done: Vec<Commit>,
    /// Redoable commits, most recent last.
    redone: Vec<Commit>,
    /// Sequence number stamped into the next commit (set by `mark`).
    pending_seq: u64,

    /// Uncommitted typing run.
    cache: Vec<char>,
    /// Rune offset of the cache window start.
    cq0: usize,

    /// Sequence number the buffer was last marked clean at.
    clean_seq: u64,
    /// True once the backing may differ from the contents.
    modded: bool,
    /// One-shot suppression of dirty warnings until the next mutation.
    treat_as_clean: bool,
}

impl PieceTable {
    /// Create a piece table holding `text`.
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes().to_vec();
        let rune_size = text.chars().count();
        let byte_size = bytes.len();
        let pieces = if byte_size > 0 {
            vec![Piece::new(BufferKind::Original, 0, byte_size, rune_size)]
        } else {
            Vec::new()
        };
        Self {
            original: bytes,
            add: Vec::new(),
            pieces,
            byte_size,
            rune_size,
            open: Vec::new(),
            done: Vec::new(),
            redone: Vec::new(),
            pending_seq: 0,
            cache: Vec::new(),
            cq0: 0,
            clean_seq: 0,
            modded: false,
            treat_as_clean: false,
        }
    }

    /// Create an empty piece table.
    pub fn empty() -> Self {
        Self::new("")
    }

    /// Committed size in bytes (the cache is not included).
    pub fn len_bytes(&self) -> usize {
        self.byte_size
    }

    /// Committed size in runes (the cache is not included).
    pub fn len_runes(&self) -> usize {
        self.rune_size
    }

    /// Complete size in runes, including the uncommitted typing cache.
    pub fn size_runes(&self) -> usize {
        self.rune_size + self.cache.len()
    }

    /// Materialize the committed contents as bytes. Used for hashing and for
    /// handing the contents to the I/O collaborator.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size);
        for piece in &self.pieces {
            out.extend_from_slice(self.piece_bytes(piece));
        }
        out
    }

    /// Materialize the committed contents as a `String`.
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.byte_size);
        for piece in &self.pieces {
            out.push_str(self.piece_str(piece));
        }
        out
    }

    /// The rune at index `i`, reading through the typing cache.
    ///
    /// # Panics
    ///
    /// Panics if `i >= size_runes()`.
    pub fn rune_at(&self, i: usize) -> char {
        if !self.cache.is_empty() {
            if i >= self.cq0 && i < self.cq0 + self.cache.len() {
                return self.cache[i - self.cq0];
            }
            if i >= self.cq0 + self.cache.len() {
                return self.committed_rune_at(i - self.cache.len());
            }
        }
        self.committed_rune_at(i)
    }

    /// Fill `dst` with committed runes starting at rune offset `off`,
    /// stopping at end of buffer. Returns the number of runes read.
    pub fn read_runes(&self, off: usize, dst: &mut [char]) -> usize {
        let mut filled = 0;
        let mut base = 0;
        for piece in &self.pieces {
            if filled == dst.len() {
                break;
            }
            let piece_end = base + piece.rune_len;
            if piece_end > off + filled {
                let s = self.piece_str(piece);
                let skip = (off + filled).saturating_sub(base);
                for ch in s.chars().skip(skip) {
                    if filled == dst.len() {
                        break;
                    }
                    dst[filled] = ch;
                    filled += 1;
                }
            }
            base = piece_end;
        }
        filled
    }

    /// Committed runes in `[q0, q1)` as a `String`.
    pub fn slice_string(&self, q0: usize, q1: usize) -> String {
        let mut out = String::new();
        let mut base = 0;
        for piece in &self.pieces {
            if base >= q1 {
                break;
            }
            let piece_end = base + piece.rune_len;
            if piece_end > q0 {
                let s = self.piece_str(piece);
                let skip = q0.saturating_sub(base);
                let take = q1.min(piece_end) - base.max(q0);
                out.extend(s.chars().skip(skip).take(take));
            }
            base = piece_end;
        }
        out
    }

    // --- mutation ---------------------------------------------------------

    /// Splice `bytes` into the committed contents at `byte_off`, recording an
    /// insert change in the open commit. `rune_off` and `rune_len` describe
    /// the same span in rune coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `byte_off` is past the end of the committed contents.
    pub fn insert_bytes(&mut self, byte_off: usize, rune_off: usize, bytes: &[u8], rune_len: usize) {
        assert!(byte_off <= self.byte_size, "insert past end of buffer");
        if bytes.is_empty() {
            return;
        }
        self.treat_as_clean = false;
        self.modded = true;

        let add_start = self.add.len();
        self.add.extend_from_slice(bytes);
        let fresh = Piece::new(BufferKind::Add, add_start, bytes.len(), rune_len);

        let (index, within) = self.piece_index_at_byte(byte_off);
        let (before, after) = if within == 0 {
            (Vec::new(), vec![fresh])
        } else {
            let old = self.pieces[index].clone();
            let (left, right) = self.split_piece(&old, within);
            (vec![old], vec![left, fresh, right])
        };

        self.pieces
            .splice(index..index + before.len(), after.iter().cloned());
        self.byte_size += bytes.len();
        self.rune_size += rune_len;
        self.open.push(Change::Insert(Splice {
            index,
            before,
            after,
            byte_off,
            rune_off,
            byte_len: bytes.len(),
            rune_len,
        }));
    }

    /// Remove `byte_len` bytes starting at `byte_off`, recording a delete
    /// change (with the unlinked pieces) in the open commit.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the committed contents.
    pub fn delete_bytes(&mut self, byte_off: usize, byte_len: usize, rune_off: usize, rune_len: usize) {
        assert!(
            byte_off + byte_len <= self.byte_size,
            "delete past end of buffer"
        );
        if byte_len == 0 {
            return;
        }
        self.treat_as_clean = false;
        self.modded = true;

        let (first, within) = self.piece_index_at_byte(byte_off);
        let byte_end = byte_off + byte_len;

        // Walk to the piece containing the end of the range.
        let mut last = first;
        let mut base = byte_off - within;
        while base + self.pieces[last].byte_len < byte_end {
            base += self.pieces[last].byte_len;
            last += 1;
        }
        let end_within = byte_end - base;

        let before: Vec<Piece> = self.pieces[first..=last].to_vec();
        let mut after = Vec::new();
        if within > 0 {
            let (left, _) = self.split_piece(&before[0], within);
            after.push(left);
        }
        if end_within < before[before.len() - 1].byte_len {
            let (_, right) = self.split_piece(&before[before.len() - 1], end_within);
            after.push(right);
        }

        self.pieces
            .splice(first..=last, after.iter().cloned());
        self.byte_size -= byte_len;
        self.rune_size -= rune_len;
        self.open.push(Change::Delete(Splice {
            index: first,
            before,
            after,
            byte_off,
            rune_off,
            byte_len,
            rune_len,
        }));
    }

    /// Record a rename of the owning buffer in the open commit so that undo
    /// restores the previous name. No-op until the buffer has been marked at
    /// least once.
    pub fn record_rename(&mut self, previous: &str, current: &str) {
        if self.pending_seq == 0 {
            return;
        }
        self.open.push(Change::Rename {
            previous: previous.to_string(),
            current: current.to_string(),
        });
    }

    // --- typing cache -----------------------------------------------------

    /// True if the typing cache holds runes that have not been committed.
    pub fn has_uncommitted(&self) -> bool {
        !self.cache.is_empty()
    }

    /// The uncommitted typing run.
    pub fn cache(&self) -> &[char] {
        &self.cache
    }

    /// Rune offset of the cache window start.
    pub fn cache_start(&self) -> usize {
        self.cq0
    }

    /// Append runes to the typing cache. The first insert of a run places the
    /// window; later inserts must continue exactly where the window ends.
    ///
    /// # Panics
    ///
    /// Panics if `rune_off` does not continue the cache window.
    pub fn cache_insert(&mut self, rune_off: usize, runes: &[char]) {
        if self.cache.is_empty() {
            assert!(rune_off <= self.rune_size, "cache insert past end of buffer");
            self.cq0 = rune_off;
        } else {
            assert_eq!(
                rune_off,
                self.cq0 + self.cache.len(),
                "cache insert does not continue the typing run"
            );
        }
        self.treat_as_clean = false;
        self.cache.extend_from_slice(runes);
    }

    /// Remove `n` runes starting at `rune_off` from the typing cache.
    ///
    /// # Panics
    ///
    /// Panics if the range is not entirely inside the cache window.
    pub fn cache_delete(&mut self, rune_off: usize, n: usize) {
        assert!(
            rune_off >= self.cq0 && rune_off + n <= self.cq0 + self.cache.len(),
            "cache delete outside the typing run"
        );
        self.treat_as_clean = false;
        let start = rune_off - self.cq0;
        self.cache.drain(start..start + n);
    }

    // --- commit boundary --------------------------------------------------

    /// Open an undo point: discard redoable history and stamp `seq` into the
    /// commit under construction. Call at the start of a logical edit; edits
    /// across several buffers that share one `seq` undo as a single step.
    pub fn mark(&mut self, seq: u64) {
        self.redone.clear();
        self.pending_seq = seq;
    }

    /// Seal the open commit (folding the typing cache into a single insert
    /// change first) and push it onto the undo stack. A commit with no
    /// changes is dropped. Returns the stamped sequence number and the net
    /// rune delta of the commit.
    pub fn commit(&mut self) -> Option<(u64, isize)> {
        if !self.cache.is_empty() {
            let run: String = self.cache.iter().collect();
            let rune_len = self.cache.len();
            let cq0 = self.cq0;
            self.cache.clear();
            assert!(cq0 <= self.rune_size, "cache window slid off the buffer");
            let byte_off = self.byte_offset_of_rune(cq0);
            self.insert_bytes(byte_off, cq0, run.as_bytes(), rune_len);
            self.modded = true;
        }
        if self.open.is_empty() {
            return None;
        }
        let commit = Commit {
            seq: self.pending_seq,
            changes: std::mem::take(&mut self.open),
        };
        let delta: isize = commit
            .changes
            .iter()
            .map(|c| match c {
                Change::Insert(s) => s.rune_len as isize,
                Change::Delete(s) => -(s.rune_len as isize),
                Change::Rename { .. } => 0,
            })
            .sum();
        trace!(target: "storage.undo", seq = commit.seq, changes = commit.changes.len(), "commit");
        self.done.push(commit);
        self.redone.clear();
        Some((self.pending_seq, delta))
    }

    /// Sequence number of the most recent undoable commit, or 0.
    pub fn top_seq(&self) -> u64 {
        self.done.last().map(|c| c.seq).unwrap_or(0)
    }

    /// Sequence number of the most recent redoable commit, or 0.
    pub fn redo_seq(&self) -> u64 {
        self.redone.last().map(|c| c.seq).unwrap_or(0)
    }

    /// Sequence number stamped by the most recent [`PieceTable::mark`].
    pub fn seq(&self) -> u64 {
        self.pending_seq
    }

    /// True if there are commits to undo.
    pub fn has_undoable(&self) -> bool {
        !self.done.is_empty() || !self.cache.is_empty()
    }

    /// True if there are commits to redo.
    pub fn has_redoable(&self) -> bool {
        !self.redone.is_empty()
    }

    /// Drop all undo history. The current contents become the initial state.
    pub fn reset(&mut self) {
        self.done.clear();
        self.redone.clear();
        self.open.clear();
        self.pending_seq = 0;
        self.clean_seq = 0;
    }

    // --- undo/redo --------------------------------------------------------

    /// Undo the most recent commit, restoring the byte-exact prior state.
    /// Returns `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<CommitSummary> {
        let commit = self.done.pop()?;
        self.treat_as_clean = false;
        let mut summary = CommitSummary {
            seq: commit.seq,
            q0: 0,
            q1: 0,
            rune_delta: 0,
            events: Vec::new(),
        };
        for change in commit.changes.iter().rev() {
            let event = self.invert(change);
            self.note_event(&mut summary, &event);
            summary.events.push(event);
        }
        trace!(target: "storage.undo", seq = commit.seq, delta = summary.rune_delta, "undo");
        self.redone.push(commit);
        Some(summary)
    }

    /// Re-apply the most recently undone commit.
    pub fn redo(&mut self) -> Option<CommitSummary> {
        let commit = self.redone.pop()?;
        self.treat_as_clean = false;
        let mut summary = CommitSummary {
            seq: commit.seq,
            q0: 0,
            q1: 0,
            rune_delta: 0,
            events: Vec::new(),
        };
        for change in commit.changes.iter() {
            let event = self.reapply(change);
            self.note_event(&mut summary, &event);
            summary.events.push(event);
        }
        trace!(target: "storage.undo", seq = commit.seq, delta = summary.rune_delta, "redo");
        self.done.push(commit);
        Some(summary)
    }

    fn note_event(&self, summary: &mut CommitSummary, event: &UndoEvent) {
        match event {
            UndoEvent::Inserted { q0, text } => {
                summary.q0 = *q0;
                summary.q1 = q0 + text.len();
                summary.rune_delta += text.len() as isize;
            }
            UndoEvent::Deleted { q0, q1 } => {
                summary.q0 = *q0;
                summary.q1 = *q0;
                summary.rune_delta -= (*q1 - *q0) as isize;
            }
            UndoEvent::Renamed { .. } => {}
        }
    }

    /// Reverse one change in place. Changes are inverted in reverse insertion
    /// order, so the recorded splice indices are valid again by the time each
    /// change is reached.
    fn invert(&mut self, change: &Change) -> UndoEvent {
        match change {
            Change::Insert(s) => {
                self.pieces
                    .splice(s.index..s.index + s.after.len(), s.before.iter().cloned());
                self.byte_size -= s.byte_len;
                self.rune_size -= s.rune_len;
                UndoEvent::Deleted {
                    q0: s.rune_off,
                    q1: s.rune_off + s.rune_len,
                }
            }
            Change::Delete(s) => {
                self.pieces
                    .splice(s.index..s.index + s.after.len(), s.before.iter().cloned());
                self.byte_size += s.byte_len;
                self.rune_size += s.rune_len;
                UndoEvent::Inserted {
                    q0: s.rune_off,
                    text: self
                        .slice_string(s.rune_off, s.rune_off + s.rune_len)
                        .chars()
                        .collect(),
                }
            }
            Change::Rename { previous, .. } => UndoEvent::Renamed {
                name: previous.clone(),
            },
        }
    }

    /// Re-apply one change in place (forward order).
    fn reapply(&mut self, change: &Change) -> UndoEvent {
        match change {
            Change::Insert(s) => {
                self.pieces
                    .splice(s.index..s.index + s.before.len(), s.after.iter().cloned());
                self.byte_size += s.byte_len;
                self.rune_size += s.rune_len;
                UndoEvent::Inserted {
                    q0: s.rune_off,
                    text: self
                        .slice_string(s.rune_off, s.rune_off + s.rune_len)
                        .chars()
                        .collect(),
                }
            }
            Change::Delete(s) => {
                self.pieces
                    .splice(s.index..s.index + s.before.len(), s.after.iter().cloned());
                self.byte_size -= s.byte_len;
                self.rune_size -= s.rune_len;
                UndoEvent::Deleted {
                    q0: s.rune_off,
                    q1: s.rune_off + s.rune_len,
                }
            }
            Change::Rename { current, .. } => UndoEvent::Renamed {
                name: current.clone(),
            },
        }
    }

    // --- dirtiness --------------------------------------------------------

    /// True if the current undo position differs from the last clean mark.
    pub fn dirty(&self) -> bool {
        self.top_seq() != self.clean_seq
    }

    /// Snapshot the current undo position as the clean state.
    pub fn clean(&mut self) {
        self.clean_seq = self.top_seq();
        self.modded = false;
        self.treat_as_clean = false;
    }

    /// Suppress the next dirty warning without clearing dirtiness.
    pub fn set_treat_as_clean(&mut self) {
        self.treat_as_clean = true;
    }

    /// True if the buffer should warn before destructive operations.
    pub fn treat_as_dirty(&self) -> bool {
        !self.treat_as_clean && self.dirty()
    }

    /// True once the backing may differ from the contents (set by any
    /// committed mutation, cleared by [`PieceTable::clean`]).
    pub fn modded(&self) -> bool {
        self.modded
    }

    /// Note that the backing differs from the contents without editing (for
    /// example after writing a partial range to disk).
    pub fn set_modded(&mut self) {
        self.modded = true;
        self.treat_as_clean = false;
    }

    // --- piece helpers ----------------------------------------------------

    fn piece_bytes(&self, piece: &Piece) -> &[u8] {
        let backing = match piece.kind {
            BufferKind::Original => &self.original,
            BufferKind::Add => &self.add,
        };
        &backing[piece.start..piece.start + piece.byte_len]
    }

    fn piece_str(&self, piece: &Piece) -> &str {
        // Edits land on rune boundaries, so every piece is valid UTF-8.
        std::str::from_utf8(self.piece_bytes(piece)).expect("piece is not valid UTF-8")
    }

    /// The piece-list index whose piece contains `byte_off`, and the byte
    /// offset within it. `byte_off == len_bytes()` maps to
    /// `(pieces.len(), 0)`.
    fn piece_index_at_byte(&self, byte_off: usize) -> (usize, usize) {
        let mut base = 0;
        for (idx, piece) in self.pieces.iter().enumerate() {
            if byte_off < base + piece.byte_len {
                return (idx, byte_off - base);
            }
            base += piece.byte_len;
        }
        (self.pieces.len(), 0)
    }

    /// Split a piece at `byte_within` (a rune boundary), returning the left
    /// and right halves.
    fn split_piece(&self, piece: &Piece, byte_within: usize) -> (Piece, Piece) {
        let s = self.piece_str(piece);
        let left_runes = s[..byte_within].chars().count();
        let left = Piece::new(piece.kind, piece.start, byte_within, left_runes);
        let right = Piece::new(
            piece.kind,
            piece.start + byte_within,
            piece.byte_len - byte_within,
            piece.rune_len - left_runes,
        );
        (left, right)
    }

    /// Map a committed rune offset to its byte offset by walking the piece
    /// list. The hot paths go through [`crate::RuneIndex`] instead; this is
    /// for internal bookkeeping such as folding the typing cache.
    pub(crate) fn byte_offset_of_rune(&self, rune_off: usize) -> usize {
        let mut rune_base = 0;
        let mut byte_base = 0;
        for piece in &self.pieces {
            if rune_off < rune_base + piece.rune_len {
                let s = self.piece_str(piece);
                let within = s
                    .char_indices()
                    .nth(rune_off - rune_base)
                    .map(|(b, _)| b)
                    .unwrap_or(piece.byte_len);
                return byte_base + within;
            }
            rune_base += piece.rune_len;
            byte_base += piece.byte_len;
        }
        self.byte_size
    }

    /// Decode the rune starting at `byte_off` (must be a rune boundary).
    pub(crate) fn decode_rune_at(&self, byte_off: usize) -> (char, usize) {
        let (idx, within) = self.piece_index_at_byte(byte_off);
        let s = self.piece_str(&self.pieces[idx]);
        let ch = s[within..]
            .chars()
            .next()
            .expect("decode at piece boundary");
        (ch, ch.len_utf8())
    }

    /// Decode the rune ending at `byte_off` (must be a rune boundary).
    pub(crate) fn decode_rune_before(&self, byte_off: usize) -> (char, usize) {
        let (idx, within) = self.piece_index_at_byte(byte_off - 1);
        let s = self.piece_str(&self.pieces[idx]);
        let ch = s[..=within]
            .chars()
            .next_back()
            .expect("decode at piece boundary");
        (ch, ch.len_utf8())
    }

    /// Byte offset of the first non-ASCII byte in `[from, to)`, if any.
    pub(crate) fn first_non_ascii_in(&self, from: usize, to: usize) -> Option<usize> {
        let mut base = 0;
        for piece in &self.pieces {
            let end = base + piece.byte_len;
            if end > from && base < to {
                let bytes = self.piece_bytes(piece);
                let lo = from.saturating_sub(base);
                let hi = (to - base).min(piece.byte_len);
                if let Some(rel) = bytes[lo..hi].iter().position(|&b| !b.is_ascii()) {
                    return Some(base + lo + rel);
                }
            }
            if base >= to {
                break;
            }
            base = end;
        }
        None
    }

    fn committed_rune_at(&self, i: usize) -> char {
        assert!(i < self.rune_size, "rune index out of range");
        let mut base = 0;
        for piece in &self.pieces {
            if i < base + piece.rune_len {
                let s = self.piece_str(piece);
                return s
                    .chars()
                    .nth(i - base)
                    .expect("piece rune count out of sync");
            }
            base += piece.rune_len;
        }
        unreachable!("rune index inside buffer but not inside any piece");
    }

    #[cfg(test)]
    fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_str(pt: &mut PieceTable, q0: usize, text: &str) {
        let byte_off = pt.byte_offset_of_rune(q0);
        pt.insert_bytes(byte_off, q0, text.as_bytes(), text.chars().count());
    }

    fn delete_range(pt: &mut PieceTable, q0: usize, q1: usize) {
        let b0 = pt.byte_offset_of_rune(q0);
        let b1 = pt.byte_offset_of_rune(q1);
        pt.delete_bytes(b0, b1 - b0, q0, q1 - q0);
    }

    #[test]
    fn test_new_piece_table() {
        let pt = PieceTable::new("Hello, World!");
        assert_eq!(pt.text(), "Hello, World!");
        assert_eq!(pt.len_runes(), 13);
    }

    #[test]
    fn test_empty_piece_table() {
        let pt = PieceTable::empty();
        assert_eq!(pt.text(), "");
        assert_eq!(pt.len_runes(), 0);
    }

    #[test]
    fn test_insert_at_start_middle_end() {
        let mut pt = PieceTable::new("Hlo");
        insert_str(&mut pt, 1, "el");
        assert_eq!(pt.text(), "Hello");
        insert_str(&mut pt, 5, ", World");
        assert_eq!(pt.text(), "Hello, World");
        insert_str(&mut pt, 0, ">> ");
        assert_eq!(pt.text(), ">> Hello, World");
    }

    #[test]
    fn test_delete_spanning_pieces() {
        let mut pt = PieceTable::new("and what is a dream?");
        pt.mark(1);
        insert_str(&mut pt, 9, "exactly ");
        pt.commit();
        assert_eq!(pt.text(), "and what exactly is a dream?");

        let cases = [
            (9, 17, "and what is a dream?"),
            (9, 22, "and what dream?"),
            (5, 11, "and wactly is a dream?"),
            (11, 14, "and what exly is a dream?"),
        ];
        for (q0, q1, expected) in cases {
            pt.mark(2);
            delete_range(&mut pt, q0, q1);
            assert_eq!(pt.text(), expected);
            pt.commit();
            pt.undo();
            assert_eq!(pt.text(), "and what exactly is a dream?");
        }
    }

    #[test]
    fn test_utf8_runes() {
        let mut pt = PieceTable::new("你好");
        assert_eq!(pt.len_runes(), 2);
        assert_eq!(pt.len_bytes(), 6);
        insert_str(&mut pt, 1, "们");
        assert_eq!(pt.text(), "你们好");
        assert_eq!(pt.len_runes(), 3);
        assert_eq!(pt.rune_at(1), '们');
    }

    #[test]
    fn test_read_runes_stops_at_end() {
        let mut pt = PieceTable::new("abc");
        insert_str(&mut pt, 3, "def");
        let mut buf = ['\0'; 16];
        let n = pt.read_runes(2, &mut buf);
        assert_eq!(n, 4);
        assert_eq!(buf[..n].iter().collect::<String>(), "cdef");
    }

    #[test]
    fn test_commit_groups_changes_into_one_undo_step() {
        let mut pt = PieceTable::new("All work makes John a dull boy");
        pt.mark(1);
        insert_str(&mut pt, 9, "and no play ");
        delete_range(&mut pt, 27, 31);
        insert_str(&mut pt, 27, "Jack");
        assert_eq!(pt.text(), "All work and no play makes Jack a dull boy");
        pt.commit();

        let summary = pt.undo().unwrap();
        assert_eq!(summary.seq, 1);
        assert_eq!(pt.text(), "All work makes John a dull boy");

        pt.redo().unwrap();
        assert_eq!(pt.text(), "All work and no play makes Jack a dull boy");
        // Nothing left to redo.
        assert!(pt.redo().is_none());
    }

    #[test]
    fn test_empty_commit_is_dropped() {
        let mut pt = PieceTable::new("x");
        pt.mark(1);
        assert!(pt.commit().is_none());
        assert!(!pt.has_undoable());
    }

    #[test]
    fn test_cache_folds_into_single_undo_step() {
        let mut pt = PieceTable::new("hello");
        pt.mark(1);
        pt.cache_insert(1, &['x']);
        pt.cache_insert(2, &['y']);
        assert_eq!(pt.size_runes(), 7);
        assert_eq!(pt.rune_at(1), 'x');
        assert_eq!(pt.rune_at(2), 'y');
        assert_eq!(pt.rune_at(3), 'e');
        pt.commit();
        assert_eq!(pt.text(), "hxyello");

        pt.undo().unwrap();
        assert_eq!(pt.text(), "hello");
        assert!(pt.undo().is_none());
    }

    #[test]
    fn test_cache_delete_simulates_backspace() {
        let mut pt = PieceTable::new("apples and oranges");
        pt.mark(1);
        pt.cache_insert(6, &"XYZ".chars().collect::<Vec<_>>());
        pt.cache_delete(8, 1);
        pt.cache_delete(7, 1);
        pt.cache_insert(7, &['!']);
        pt.commit();
        assert_eq!(pt.text(), "applesX! and oranges");
        pt.undo().unwrap();
        assert_eq!(pt.text(), "apples and oranges");
    }

    #[test]
    #[should_panic(expected = "does not continue the typing run")]
    fn test_cache_insert_discontinuity_panics() {
        let mut pt = PieceTable::new("hello");
        pt.cache_insert(1, &['x']);
        pt.cache_insert(4, &['y']);
    }

    #[test]
    fn test_undo_reports_signed_delta() {
        let mut pt = PieceTable::new("abc");
        pt.mark(1);
        insert_str(&mut pt, 3, "def");
        pt.commit();
        let s = pt.undo().unwrap();
        assert_eq!(s.rune_delta, -3);
        let s = pt.redo().unwrap();
        assert_eq!(s.rune_delta, 3);
    }

    #[test]
    fn test_new_commit_clears_redo() {
        let mut pt = PieceTable::new("a");
        pt.mark(1);
        insert_str(&mut pt, 1, "b");
        pt.commit();
        pt.undo().unwrap();
        assert!(pt.has_redoable());

        pt.mark(2);
        insert_str(&mut pt, 1, "c");
        pt.commit();
        assert!(!pt.has_redoable());
        assert_eq!(pt.text(), "ac");
    }

    #[test]
    fn test_dirty_tracks_clean_mark() {
        let mut pt = PieceTable::new("a");
        assert!(!pt.dirty());
        pt.mark(1);
        insert_str(&mut pt, 1, "b");
        pt.commit();
        assert!(pt.dirty());
        pt.clean();
        assert!(!pt.dirty());
        pt.mark(2);
        insert_str(&mut pt, 2, "c");
        pt.commit();
        assert!(pt.dirty());
        // Undoing back to the clean mark clears dirtiness.
        pt.undo().unwrap();
        assert!(!pt.dirty());
    }

    #[test]
    fn test_rename_round_trips_through_undo() {
        let mut pt = PieceTable::new("x");
        pt.mark(1);
        pt.record_rename("old", "new");
        pt.commit();
        let s = pt.undo().unwrap();
        assert!(matches!(
            &s.events[0],
            UndoEvent::Renamed { name } if name == "old"
        ));
        let s = pt.redo().unwrap();
        assert!(matches!(
            &s.events[0],
            UndoEvent::Renamed { name } if name == "new"
        ));
    }

    #[test]
    fn test_piece_count_grows_on_middle_insert() {
        let mut pt = PieceTable::new("abcdef");
        assert_eq!(pt.piece_count(), 1);
        insert_str(&mut pt, 3, "X");
        assert_eq!(pt.piece_count(), 3);
    }
}
