//! Ranges, capture sets, and address arithmetic.
//!
//! An address expression is a chain of [`Addr`] primitives
//! (`. $ * 'c #n nL /re/ ?re? "re"`) combined by `+ - , ;`. The parser builds
//! the chain; evaluation lives in the command engine because `"re"` can
//! switch buffers. The two primitives that only need one buffer — rune and
//! line addressing — are implemented here.

use crate::buffer::ObservableBuffer;
use crate::error::{EditError, Result};

/// A rune range `[q0, q1)` with `q0 <= q1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    /// Start rune offset.
    pub q0: usize,
    /// End rune offset.
    pub q1: usize,
}

impl Range {
    /// Create a range.
    pub fn new(q0: usize, q1: usize) -> Self {
        Self { q0, q1 }
    }

    /// Number of runes covered.
    pub fn len(&self) -> usize {
        self.q1 - self.q0
    }

    /// True if the range covers nothing.
    pub fn is_empty(&self) -> bool {
        self.q0 == self.q1
    }
}

/// An ordered sequence of ranges produced by a regex match: index 0 is the
/// whole match, indices 1..=9 the capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet(pub Vec<Range>);

impl RangeSet {
    /// The whole-match range.
    pub fn whole(&self) -> Range {
        self.0[0]
    }

    /// Capture group `i` (0 = whole match); empty range if the group did not
    /// participate in the match.
    pub fn group(&self, i: usize) -> Range {
        self.0.get(i).copied().unwrap_or_default()
    }
}

/// One primitive of a parsed address expression.
///
/// `typ` is the grammar character: `l` for line numbers, `#` for rune
/// counts, and the literal character for everything else. Primitives chain
/// through `next`; the `,` and `;` compounds hold their left side in `left`.
#[derive(Debug, Clone, Default)]
pub struct Addr {
    /// Primitive kind character.
    pub typ: char,
    /// Count for `l` and `#` primitives.
    pub num: usize,
    /// Pattern for `/ ? "` primitives.
    pub re: Option<String>,
    /// Left side of a `,`/`;` compound.
    pub left: Option<Box<Addr>>,
    /// Rest of the chain.
    pub next: Option<Box<Addr>>,
}

/// Rune-count addressing: `#n` either jumps to rune `n` (no sign) or moves
/// `n` runes from the appropriate end of `r`.
pub fn char_addr(n: usize, r: Range, sign: i32, nr: usize) -> Result<Range> {
    let out = if sign == 0 {
        Range::new(n, n)
    } else if sign < 0 {
        let q0 = r.q0.checked_sub(n).ok_or(EditError::AddressOutOfRange)?;
        Range::new(q0, q0)
    } else {
        let q1 = r.q1 + n;
        Range::new(q1, q1)
    };
    if out.q1 > nr {
        return Err(EditError::AddressOutOfRange);
    }
    Ok(out)
}

/// Line addressing: scan for the `l`-th newline from the reference point.
///
/// With `sign >= 0` the scan runs forward from `r.q1` (or the buffer start
/// when unsigned); with `sign < 0` it runs backward from `r.q0`. The
/// resulting range covers one line, excluding its newline: `q0` sits just
/// after a newline (or at 0) and `q1` sits on a newline (or at the end).
pub fn line_addr(l: usize, buffer: &mut ObservableBuffer, r: Range, sign: i32) -> Result<Range> {
    let size = buffer.size_runes();
    let mut out = Range::default();
    if sign >= 0 {
        let mut p;
        if l == 0 {
            if sign == 0 || r.q1 == 0 {
                return Ok(Range::new(0, 0));
            }
            out.q0 = r.q1;
            p = r.q1 - 1;
        } else {
            let mut n;
            if sign == 0 || r.q1 == 0 {
                p = 0;
                n = 1;
            } else {
                p = r.q1 - 1;
                n = usize::from(buffer.rune_at(p) == '\n');
                p += 1;
            }
            while n < l {
                if p >= size {
                    return Err(EditError::AddressOutOfRange);
                }
                if buffer.rune_at(p) == '\n' {
                    n += 1;
                }
                p += 1;
            }
            out.q0 = p;
        }
        while p < size && buffer.rune_at(p) != '\n' {
            p += 1;
        }
        out.q1 = p;
        // `+0` from a dot that sits just past a newline scans nothing; keep
        // the range well-formed.
        if out.q1 < out.q0 {
            out.q1 = out.q0;
        }
    } else {
        let mut p = r.q0;
        if l == 0 {
            out.q1 = r.q0;
        } else {
            let mut n = 0;
            while n < l {
                // Always runs at least once.
                if p == 0 {
                    n += 1;
                    if n != l {
                        return Err(EditError::AddressOutOfRange);
                    }
                } else if buffer.rune_at(p - 1) != '\n' {
                    p -= 1;
                } else {
                    n += 1;
                    if n != l {
                        p -= 1;
                    }
                }
            }
            out.q1 = p;
            // Keep the same newline-exclusive convention as the forward
            // scan: q1 sits on the newline, not past it.
            if out.q1 > 0 && buffer.rune_at(out.q1 - 1) == '\n' {
                out.q1 -= 1;
            }
            if p > 0 {
                p -= 1;
            }
        }
        while p > 0 && buffer.rune_at(p - 1) != '\n' {
            // Lines start just after a newline.
            p -= 1;
        }
        out.q0 = p;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(text: &str) -> ObservableBuffer {
        ObservableBuffer::with_text("test", text)
    }

    #[test]
    fn test_char_addr_absolute_and_relative() {
        assert_eq!(char_addr(3, Range::new(0, 0), 0, 10).unwrap(), Range::new(3, 3));
        assert_eq!(char_addr(2, Range::new(4, 6), 1, 10).unwrap(), Range::new(8, 8));
        assert_eq!(char_addr(2, Range::new(4, 6), -1, 10).unwrap(), Range::new(2, 2));
        assert!(char_addr(11, Range::new(0, 0), 0, 10).is_err());
        assert!(char_addr(5, Range::new(4, 4), -1, 10).is_err());
    }

    #[test]
    fn test_line_addr_absolute() {
        let mut b = buffer("one\ntwo\nthree\n");
        // Line 1 is "one", line 2 "two", line 3 "three".
        assert_eq!(line_addr(1, &mut b, Range::new(0, 0), 0).unwrap(), Range::new(0, 3));
        assert_eq!(line_addr(2, &mut b, Range::new(0, 0), 0).unwrap(), Range::new(4, 7));
        assert_eq!(line_addr(3, &mut b, Range::new(0, 0), 0).unwrap(), Range::new(8, 13));
        assert!(line_addr(5, &mut b, Range::new(0, 0), 0).is_err());
    }

    #[test]
    fn test_line_addr_boundaries_touch_newlines() {
        let mut b = buffer("aa\nbb\ncc");
        let size = b.size_runes();
        for l in 1..=3 {
            let r = line_addr(l, &mut b, Range::new(0, 0), 0).unwrap();
            assert!(r.q0 == 0 || b.rune_at(r.q0 - 1) == '\n', "line {}", l);
            assert!(r.q1 == size || b.rune_at(r.q1) == '\n', "line {}", l);
        }
    }

    #[test]
    fn test_line_addr_forward_relative() {
        let mut b = buffer("one\ntwo\nthree\n");
        // From dot at line 1, "+1" reaches line 2.
        let r = line_addr(1, &mut b, Range::new(0, 3), 1).unwrap();
        assert_eq!(r, Range::new(4, 7));
        let r = line_addr(2, &mut b, Range::new(0, 3), 1).unwrap();
        assert_eq!(r, Range::new(8, 13));
    }

    #[test]
    fn test_line_addr_backward_relative() {
        let mut b = buffer("one\ntwo\nthree\n");
        // From dot at line 3, "-1" reaches line 2.
        let r = line_addr(1, &mut b, Range::new(8, 13), -1).unwrap();
        assert_eq!(r, Range::new(4, 7));
        let r = line_addr(2, &mut b, Range::new(8, 13), -1).unwrap();
        assert_eq!(r, Range::new(0, 3));
        assert!(line_addr(4, &mut b, Range::new(8, 13), -1).is_err());
    }
}
