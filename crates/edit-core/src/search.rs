//! Structural regex matching.
//!
//! Wraps a compiled [`regex::Regex`] with the rune-offset surface the
//! command engine works in. Matches are reported as [`RangeSet`]s: index 0
//! is the whole match and indices 1..=9 the capture groups referenced by
//! `\1..\9` in substitutions.
//!
//! Patterns are compiled multi-line, so `^` and `$` anchor to line
//! boundaries of the *whole* text being searched and `.` does not match a
//! newline. A range argument bounds where matches may start and end; it does
//! not change what the anchors see.

use regex::{Regex, RegexBuilder};

use crate::address::{Range, RangeSet};
use crate::error::{EditError, Result};

/// The most capture groups a [`RangeSet`] reports (whole match + `\1..\9`).
const MAX_GROUPS: usize = 10;

/// A compiled structural regex.
#[derive(Debug, Clone)]
pub struct Pattern {
    re: Regex,
    expr: String,
}

/// Maps between rune offsets and byte offsets of one search text.
#[derive(Debug)]
pub(crate) struct CharIndex {
    char_to_byte: Vec<usize>,
    text_len: usize,
}

impl CharIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut char_to_byte: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        char_to_byte.push(text.len());
        Self {
            char_to_byte,
            text_len: text.len(),
        }
    }

    pub(crate) fn char_count(&self) -> usize {
        self.char_to_byte.len().saturating_sub(1)
    }

    pub(crate) fn char_to_byte(&self, char_offset: usize) -> usize {
        let clamped = char_offset.min(self.char_count());
        self.char_to_byte
            .get(clamped)
            .copied()
            .unwrap_or(self.text_len)
    }

    pub(crate) fn byte_to_char(&self, byte_offset: usize) -> usize {
        let clamped = byte_offset.min(self.text_len);
        match self.char_to_byte.binary_search(&clamped) {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }
}

impl Pattern {
    /// Compile `expr`. Fails with [`EditError::BadRegex`] on a malformed or
    /// empty pattern.
    pub fn compile(expr: &str) -> Result<Self> {
        if expr.is_empty() {
            return Err(EditError::BadRegex("empty pattern".to_string()));
        }
        let re = RegexBuilder::new(expr)
            .multi_line(true)
            .build()
            .map_err(|err| EditError::BadRegex(err.to_string()))?;
        Ok(Self {
            re,
            expr: expr.to_string(),
        })
    }

    /// The source expression.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Scan forward over `text` for non-overlapping matches.
    ///
    /// Matches must start at or after rune `start`; when `end` is given they
    /// must also start and end at or before it. Scanning is left-to-right
    /// and longest-at-each-position; an empty match advances the scan by one
    /// rune so it cannot livelock. At most `max` matches are returned when
    /// `max` is given.
    pub fn find_forward(
        &self,
        text: &str,
        start: usize,
        end: Option<usize>,
        max: Option<usize>,
    ) -> Vec<RangeSet> {
        let map = CharIndex::new(text);
        let b_end = end.map(|q| map.char_to_byte(q)).unwrap_or(text.len());
        let mut pos = map.char_to_byte(start);
        let mut out = Vec::new();
        while pos <= b_end {
            let caps = match self.re.captures_at(text, pos) {
                Some(caps) => caps,
                None => break,
            };
            let whole = caps.get(0).expect("group 0 always participates");
            if whole.start() > b_end || whole.end() > b_end {
                break;
            }
            out.push(range_set(&caps, &map));
            if max.is_some_and(|m| out.len() >= m) {
                break;
            }
            pos = if whole.end() == whole.start() {
                match text[whole.end()..].chars().next() {
                    Some(c) => whole.end() + c.len_utf8(),
                    None => break,
                }
            } else {
                whole.end()
            };
        }
        out
    }

    /// Find the match ending closest to (at or before) rune `start`,
    /// scanning the whole text. Overlapping candidates are considered, so
    /// this finds matches a forward non-overlapping enumeration would skip.
    pub fn find_backward(&self, text: &str, start: usize) -> Option<RangeSet> {
        let map = CharIndex::new(text);
        let b_limit = map.char_to_byte(start);
        let mut best: Option<(RangeSet, usize)> = None;
        let mut pos = 0;
        while pos <= text.len() {
            let caps = match self.re.captures_at(text, pos) {
                Some(caps) => caps,
                None => break,
            };
            let whole = caps.get(0).expect("group 0 always participates");
            if whole.start() >= b_limit && whole.end() > b_limit {
                // Every later match ends past the limit too.
                break;
            }
            if whole.end() <= b_limit {
                let better = best
                    .as_ref()
                    .map(|(_, end)| whole.end() > *end)
                    .unwrap_or(true);
                if better {
                    best = Some((range_set(&caps, &map), whole.end()));
                }
            }
            // Retry one rune past this match's start: a shorter overlapping
            // match may still end inside the limit.
            pos = match text[whole.start()..].chars().next() {
                Some(c) => whole.start() + c.len_utf8(),
                None => break,
            };
        }
        best.map(|(set, _)| set)
    }
}

fn range_set(caps: &regex::Captures<'_>, map: &CharIndex) -> RangeSet {
    let groups = caps.len().min(MAX_GROUPS);
    let mut sel = Vec::with_capacity(groups);
    for i in 0..groups {
        match caps.get(i) {
            Some(m) => sel.push(Range::new(
                map.byte_to_char(m.start()),
                map.byte_to_char(m.end()),
            )),
            None => sel.push(Range::default()),
        }
    }
    RangeSet(sel)
}
