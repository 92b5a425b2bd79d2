//! Rune-indexed cursor over a piece table.
//!
//! UTF-8 makes rune-indexed access O(n) in general. [`RuneIndex`] keeps a
//! cursor (rune position, byte position, width of the rune under the cursor)
//! and exploits locality: moving the cursor by one rune, or revisiting the
//! start or end of the buffer, is O(1). Random access scans from the closest
//! of {ASCII boundary, cursor, end}.
//!
//! The prefix `[0, non_ascii)` is pure ASCII, where rune index equals byte
//! index and every query short-circuits to plain arithmetic. A buffer that
//! never sees a non-ASCII rune never scans at all.

use crate::storage::PieceTable;

/// Amortized O(1) rune-to-byte cursor.
///
/// The index mirrors the committed contents of one [`PieceTable`]; the owner
/// must report every structural change through [`RuneIndex::did_insert`] and
/// [`RuneIndex::did_delete`].
#[derive(Debug, Clone)]
pub struct RuneIndex {
    /// Committed rune count of the indexed table.
    num_runes: usize,
    /// Byte position of the cursor.
    byte_pos: usize,
    /// Rune position of the cursor.
    rune_pos: usize,
    /// If non-zero, the rune at `rune_pos` starts at `byte_pos` and occupies
    /// this many bytes.
    width: usize,
    /// Byte index of the first non-ASCII byte (== byte length when the
    /// contents are pure ASCII).
    non_ascii: usize,
}

impl RuneIndex {
    /// Build an index for the current committed contents of `table`.
    pub fn new(table: &PieceTable) -> Self {
        let len = table.len_bytes();
        Self {
            num_runes: table.len_runes(),
            byte_pos: 0,
            rune_pos: 0,
            width: 0,
            non_ascii: table.first_non_ascii_in(0, len).unwrap_or(len),
        }
    }

    /// Committed rune count.
    pub fn num_runes(&self) -> usize {
        self.num_runes
    }

    /// Byte index of the first non-ASCII byte.
    pub fn non_ascii_start(&self) -> usize {
        self.non_ascii
    }

    /// True if the indexed contents are pure ASCII.
    pub fn is_ascii(&self, table: &PieceTable) -> bool {
        self.non_ascii == table.len_bytes()
    }

    /// The rune at index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn rune_at(&mut self, table: &PieceTable, i: usize) -> char {
        // ASCII prefix: rune index equals byte index.
        if i < self.non_ascii {
            return table.decode_rune_at(i).0;
        }
        assert!(i < self.num_runes, "rune index out of range");

        // Within one step of the cursor, or at either end: O(1).
        if self.width > 0 {
            if self.rune_pos > 0 && i == self.rune_pos - 1 {
                let (r, w) = table.decode_rune_before(self.byte_pos);
                self.rune_pos = i;
                self.byte_pos -= w;
                self.width = w;
                return r;
            }
            if i == self.rune_pos + 1 {
                self.rune_pos = i;
                self.byte_pos += self.width;
                let (r, w) = table.decode_rune_at(self.byte_pos);
                self.width = w;
                return r;
            }
        }
        if i == self.rune_pos && self.byte_pos < table.len_bytes() {
            let (r, w) = table.decode_rune_at(self.byte_pos);
            self.width = w;
            return r;
        }
        if i == 0 {
            self.rune_pos = 0;
            self.byte_pos = 0;
            let (r, w) = table.decode_rune_at(0);
            self.width = w;
            return r;
        }
        if i == self.num_runes - 1 {
            let (r, w) = table.decode_rune_before(table.len_bytes());
            self.rune_pos = i;
            self.byte_pos = table.len_bytes() - w;
            self.width = w;
            return r;
        }

        // Linear scan from the closest anchor, backwards if that is shorter.
        let mut forward = true;
        if i < self.rune_pos {
            // Both i and the cursor sit at or past the ASCII boundary, so the
            // boundary is the lowest sensible starting point.
            if i < self.non_ascii + (self.rune_pos - self.non_ascii) / 2 {
                self.byte_pos = self.non_ascii;
                self.rune_pos = self.non_ascii;
            } else {
                forward = false;
            }
        } else if i - self.rune_pos >= (self.num_runes - self.rune_pos) / 2 {
            self.byte_pos = table.len_bytes();
            self.rune_pos = self.num_runes;
            forward = false;
        }

        if forward {
            loop {
                let (r, w) = table.decode_rune_at(self.byte_pos);
                if self.rune_pos == i {
                    self.width = w;
                    return r;
                }
                self.rune_pos += 1;
                self.byte_pos += w;
            }
        } else {
            loop {
                let (r, w) = table.decode_rune_before(self.byte_pos);
                self.rune_pos -= 1;
                self.byte_pos -= w;
                if self.rune_pos == i {
                    self.width = w;
                    return r;
                }
            }
        }
    }

    /// Byte offset of rune `q`. `q == num_runes()` maps to the byte length.
    pub fn byte_of_rune(&mut self, table: &PieceTable, q: usize) -> usize {
        if q < self.non_ascii {
            return q;
        }
        if q == self.num_runes {
            return table.len_bytes();
        }
        self.rune_at(table, q);
        self.byte_pos
    }

    /// Account for an insertion of `rune_len` runes / `byte_len` bytes at
    /// (`rune_off`, `byte_off`). Must be called after the table mutated.
    pub fn did_insert(
        &mut self,
        table: &PieceTable,
        byte_off: usize,
        byte_len: usize,
        rune_len: usize,
    ) {
        self.num_runes += rune_len;
        if byte_off <= self.non_ascii {
            self.non_ascii = match table.first_non_ascii_in(byte_off, byte_off + byte_len) {
                Some(b) => b,
                None => self.non_ascii + byte_len,
            };
        }
        if self.byte_pos >= byte_off {
            self.byte_pos += byte_len;
            self.rune_pos += rune_len;
        }
    }

    /// Account for a deletion of `[byte_off, byte_off + byte_len)` covering
    /// `rune_len` runes starting at `rune_off`. Must be called after the
    /// table mutated. The ASCII boundary is recomputed only when the deleted
    /// region crossed it.
    pub fn did_delete(
        &mut self,
        table: &PieceTable,
        byte_off: usize,
        byte_len: usize,
        rune_off: usize,
        rune_len: usize,
    ) {
        self.num_runes -= rune_len;
        if byte_off + byte_len <= self.non_ascii {
            self.non_ascii -= byte_len;
        } else if byte_off <= self.non_ascii {
            self.non_ascii = table
                .first_non_ascii_in(byte_off, table.len_bytes())
                .unwrap_or(table.len_bytes());
        }
        if self.byte_pos >= byte_off + byte_len {
            self.byte_pos -= byte_len;
            self.rune_pos -= rune_len;
        } else if self.byte_pos > byte_off {
            self.byte_pos = byte_off;
            self.rune_pos = rune_off;
            self.width = 0;
        } else if self.byte_pos == byte_off {
            self.width = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_and_index(text: &str) -> (PieceTable, RuneIndex) {
        let table = PieceTable::new(text);
        let index = RuneIndex::new(&table);
        (table, index)
    }

    fn insert(table: &mut PieceTable, index: &mut RuneIndex, q0: usize, text: &str) {
        let byte_off = index.byte_of_rune(table, q0);
        table.insert_bytes(byte_off, q0, text.as_bytes(), text.chars().count());
        index.did_insert(table, byte_off, text.len(), text.chars().count());
    }

    fn delete(table: &mut PieceTable, index: &mut RuneIndex, q0: usize, q1: usize) {
        let b0 = index.byte_of_rune(table, q0);
        let b1 = index.byte_of_rune(table, q1);
        table.delete_bytes(b0, b1 - b0, q0, q1 - q0);
        index.did_delete(table, b0, b1 - b0, q0, q1 - q0);
    }

    #[test]
    fn test_ascii_fast_path() {
        let (table, mut index) = table_and_index("hello world");
        assert!(index.is_ascii(&table));
        assert_eq!(index.rune_at(&table, 0), 'h');
        assert_eq!(index.rune_at(&table, 10), 'd');
        assert_eq!(index.byte_of_rune(&table, 7), 7);
    }

    #[test]
    fn test_mixed_content_random_access() {
        let (table, mut index) = table_and_index("痛苦Lorem");
        assert_eq!(index.num_runes(), 7);
        assert_eq!(index.non_ascii_start(), 0);
        assert_eq!(index.rune_at(&table, 0), '痛');
        assert_eq!(index.rune_at(&table, 1), '\u{82E6}');
        assert_eq!(index.rune_at(&table, 2), 'L');
        assert_eq!(index.rune_at(&table, 6), 'm');
        assert_eq!(index.byte_of_rune(&table, 2), 6);
        assert_eq!(index.byte_of_rune(&table, 7), 11);
    }

    #[test]
    fn test_sequential_scans_both_directions() {
        let text = "aé漢x𐍈b";
        let (table, mut index) = table_and_index(text);
        let runes: Vec<char> = text.chars().collect();
        for (i, expected) in runes.iter().enumerate() {
            assert_eq!(index.rune_at(&table, i), *expected, "forward at {}", i);
        }
        for (i, expected) in runes.iter().enumerate().rev() {
            assert_eq!(index.rune_at(&table, i), *expected, "backward at {}", i);
        }
    }

    #[test]
    fn test_delete_before_non_ascii_shifts_boundary() {
        let (mut table, mut index) = table_and_index("abc漢def");
        assert_eq!(index.non_ascii_start(), 3);
        delete(&mut table, &mut index, 0, 2);
        assert_eq!(index.non_ascii_start(), 1);
        assert_eq!(index.rune_at(&table, 1), '漢');
    }

    #[test]
    fn test_delete_crossing_non_ascii_recomputes() {
        let (mut table, mut index) = table_and_index("痛苦Lorem");
        delete(&mut table, &mut index, 0, 2);
        assert_eq!(table.text(), "Lorem");
        assert_eq!(index.num_runes(), 5);
        assert!(index.is_ascii(&table));
        assert_eq!(index.rune_at(&table, 0), 'L');
    }

    #[test]
    fn test_insert_non_ascii_lowers_boundary() {
        let (mut table, mut index) = table_and_index("abcdef");
        assert!(index.is_ascii(&table));
        insert(&mut table, &mut index, 3, "漢字");
        assert_eq!(index.non_ascii_start(), 3);
        assert_eq!(index.rune_at(&table, 3), '漢');
        assert_eq!(index.rune_at(&table, 5), 'd');
        assert_eq!(index.num_runes(), 8);
    }

    #[test]
    fn test_byte_of_rune_after_edits() {
        let (mut table, mut index) = table_and_index("héllo");
        insert(&mut table, &mut index, 5, " wörld");
        assert_eq!(table.text(), "héllo wörld");
        // 'w' is rune 6; bytes: h(1) é(2) l l o (1 each) space(1).
        assert_eq!(index.byte_of_rune(&table, 6), 7);
        assert_eq!(index.rune_at(&table, 7), 'ö');
        assert_eq!(index.rune_at(&table, 8), 'r');
    }
}
