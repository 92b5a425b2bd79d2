//! Edit command engine.
//!
//! [`CommandEngine`] owns the set of open buffers (each paired with the
//! [`View`] that supplies its dot), parses command lines, evaluates
//! addresses, and dispatches to the per-command executors. Side effects go
//! through each buffer's journal; the engine applies every journal at the
//! end of a successful command under one shared sequence number, so a whole
//! compound — `{}` blocks, `x`/`y`/`g`/`v` loops, cross-file `X`/`Y` — undoes
//! as a single step. On error the journals are discarded and no buffer is
//! touched.
//!
//! # Example
//!
//! ```rust
//! use edit_core::{CommandEngine, MemIo, NullRunner};
//!
//! let mut engine = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
//! let id = engine.create_buffer("/tmp/play", "All work makes John a dull boy");
//! engine.execute(",s/John/Jack/").unwrap();
//! assert_eq!(engine.text(id), "All work makes Jack a dull boy");
//! engine.execute("u").unwrap();
//! assert_eq!(engine.text(id), "All work makes John a dull boy");
//! ```

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::address::{char_addr, line_addr, Addr, Range, RangeSet};
use crate::buffer::{runes_from_bytes, ObservableBuffer};
use crate::error::{EditError, Result};
use crate::io::{ContentHash, FileIo, ProcessRunner};
use crate::parser::{lookup, parse_command_list, Cmd, DefAddr};
use crate::search::Pattern;
use crate::view::View;

/// Longest capture or whole-match expansion an `s` replacement may splice in.
const MAX_REPLACEMENT: usize = 8 * 1024;

/// Handle to an open file: an index into the engine's file table, stable
/// until the file is closed.
pub type FileId = usize;

/// An address resolved against a specific open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// The resolved rune range.
    pub r: Range,
    /// The file the range lives in.
    pub file: FileId,
}

/// What the engine is doing with incoming text, exposed so collaborators can
/// tell an edit in progress from a `<`-style collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// No command is executing.
    Inactive,
    /// A command is executing; pipe output replaces buffer text.
    Inserting,
    /// A `<` pipe is collecting text for a file-name list.
    Collecting,
}

/// One open file: the shared buffer plus the view that holds its dot.
pub struct OpenFile {
    /// The shared buffer.
    pub buffer: Rc<RefCell<ObservableBuffer>>,
    /// The engine-driven view, registered as the buffer's current observer.
    pub view: Rc<RefCell<View>>,
}

/// A [`ProcessRunner`] that refuses to run anything. The default for engines
/// that do not wire up an external shell.
pub struct NullRunner;

impl ProcessRunner for NullRunner {
    fn run(&mut self, _cmd: &str, _dir: &str, _input: &str) -> std::io::Result<String> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no process runner configured",
        ))
    }
}

/// The structural-regex edit command interpreter.
pub struct CommandEngine {
    files: Vec<Option<OpenFile>>,
    current: Option<FileId>,
    /// Engine-scoped edit sequence number; every buffer a command touches
    /// commits under the same value.
    seq: u64,
    state: EditState,
    /// True while an `X`/`Y` loop runs; they may not nest.
    looping: bool,
    /// `g`/`v`/`x`/`y` nesting depth; `s` only reports "no substitution" at
    /// the outermost level.
    nest: usize,
    /// Text gathered by a `<` pipe in collecting state.
    collection: Vec<char>,
    io: Box<dyn FileIo>,
    runner: Box<dyn ProcessRunner>,
    report: Box<dyn FnMut(&str)>,
    /// Working directory handed to pipe commands.
    dir: String,
}

impl CommandEngine {
    /// Create an engine over the given collaborators.
    pub fn new(io: Box<dyn FileIo>, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            files: Vec::new(),
            current: None,
            seq: 0,
            state: EditState::Inactive,
            looping: false,
            nest: 0,
            collection: Vec::new(),
            io,
            runner,
            report: Box::new(|_| {}),
            dir: ".".to_string(),
        }
    }

    /// Install the sink that receives `p`/`=` output and warning lines.
    pub fn set_reporter(&mut self, report: impl FnMut(&str) + 'static) {
        self.report = Box::new(report);
    }

    /// Set the working directory handed to pipe commands.
    pub fn set_dir(&mut self, dir: &str) {
        self.dir = dir.to_string();
    }

    /// Current editing state.
    pub fn state(&self) -> EditState {
        self.state
    }

    // --- file management --------------------------------------------------

    /// Open a new buffer holding `text` and make it current.
    pub fn create_buffer(&mut self, name: &str, text: &str) -> FileId {
        let buffer = Rc::new(RefCell::new(ObservableBuffer::with_text(name, text)));
        let view = Rc::new(RefCell::new(View::new()));
        buffer.borrow_mut().add_observer(view.clone());
        self.files.push(Some(OpenFile { buffer, view }));
        let id = self.files.len() - 1;
        self.current = Some(id);
        id
    }

    /// Open `path` through the I/O collaborator and make it current. A
    /// missing file opens as an empty buffer with that name.
    pub fn open(&mut self, path: &str) -> Result<FileId> {
        if let Some(id) = self.lookup_file(path) {
            self.current = Some(id);
            return Ok(id);
        }
        let id = self.create_buffer(path, "");
        match self.io.open_for_read(path) {
            Ok(reader) => {
                let buffer = self.buf(id);
                let mut b = buffer.borrow_mut();
                b.load(0, reader, true)?;
                b.clean();
                drop(b);
                if let Ok(info) = self.io.stat(path) {
                    let buffer = self.buf(id);
                    let mut b = buffer.borrow_mut();
                    b.set_dir(info.is_dir);
                    b.update_info(path, info, self.io.as_mut())?;
                }
                Ok(id)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(id),
            Err(err) => Err(err.into()),
        }
    }

    /// The current file, if any.
    pub fn current_file(&self) -> Option<FileId> {
        self.current
    }

    /// Make `id` the current file.
    pub fn set_current(&mut self, id: FileId) {
        if self.files.get(id).map(|f| f.is_some()).unwrap_or(false) {
            self.current = Some(id);
        }
    }

    /// The shared buffer behind `id`.
    pub fn buffer(&self, id: FileId) -> Rc<RefCell<ObservableBuffer>> {
        self.buf(id)
    }

    /// Current contents of `id`.
    pub fn text(&self, id: FileId) -> String {
        self.buf(id).borrow().text()
    }

    /// Current dot of `id`'s engine view.
    pub fn dot(&self, id: FileId) -> (usize, usize) {
        self.view_rc(id).borrow().dot()
    }

    /// Ids of every open file.
    pub fn open_files(&self) -> Vec<FileId> {
        (0..self.files.len())
            .filter(|&id| self.files[id].is_some())
            .collect()
    }

    fn buf(&self, id: FileId) -> Rc<RefCell<ObservableBuffer>> {
        self.files[id]
            .as_ref()
            .expect("file is closed")
            .buffer
            .clone()
    }

    fn view_rc(&self, id: FileId) -> Rc<RefCell<View>> {
        self.files[id]
            .as_ref()
            .expect("file is closed")
            .view
            .clone()
    }

    fn lookup_file(&self, name: &str) -> Option<FileId> {
        self.open_files()
            .into_iter()
            .find(|&id| self.buf(id).borrow().name() == name)
    }

    fn set_dot(&self, id: FileId, q0: usize, q1: usize) {
        self.view_rc(id).borrow_mut().set_dot(q0, q1);
    }

    fn mkaddr(&self, id: FileId) -> Address {
        let (q0, q1) = self.view_rc(id).borrow().dot();
        Address {
            r: Range::new(q0, q1),
            file: id,
        }
    }

    fn emit(&mut self, msg: &str) {
        (self.report)(msg);
    }

    // --- execution --------------------------------------------------------

    /// Parse and run a command line. All edits across all buffers apply
    /// atomically under one sequence number; on error every pending journal
    /// is discarded, the error is reported as a warning line, and no buffer
    /// changes.
    pub fn execute(&mut self, line: &str) -> Result<()> {
        debug!(target: "edit.cmd", cmd = line, "execute");
        let parsed = parse_command_list(line);
        let result = match parsed {
            Err(err) => Err(err),
            Ok(cmds) => {
                self.seq += 1;
                self.state = EditState::Inserting;
                self.nest = 0;
                self.looping = false;
                let mut run = Ok(());
                for cmd in &cmds {
                    run = self.cmd_exec(self.current, cmd);
                    if run.is_err() {
                        break;
                    }
                }
                match run {
                    Ok(()) => {
                        self.apply_all();
                        Ok(())
                    }
                    Err(err) => {
                        self.discard_all();
                        Err(err)
                    }
                }
            }
        };
        self.state = EditState::Inactive;
        self.collection.clear();
        if let Err(err) = &result {
            let msg = format!("?{}", err);
            self.emit(&msg);
        }
        result
    }

    fn apply_all(&mut self) {
        for id in self.open_files() {
            let buffer = self.buf(id);
            let mut b = buffer.borrow_mut();
            if !b.journal().is_empty() {
                b.mark(self.seq);
                b.apply_journal();
            }
        }
    }

    fn discard_all(&mut self) {
        for id in self.open_files() {
            self.buf(id).borrow_mut().journal_mut().clear();
        }
    }

    fn cmd_exec(&mut self, t: Option<FileId>, cp: &Cmd) -> Result<()> {
        trace!(target: "edit.cmd", cmdc = %cp.cmdc, "dispatch");
        let cmdc = cp.cmdc;
        let addr_is_file = matches!(cp.addr.as_ref().map(|a| a.typ), Some('"'));
        if t.is_none()
            && !addr_is_file
            && !"bBXY".contains(cmdc)
            && !(cmdc == 'D' && !cp.text.is_empty())
        {
            return Err(EditError::NoCurrentView);
        }

        // Resolve the command's address, supplying the table default when
        // none was written.
        let def = lookup(cmdc);
        let mut t = t;
        let mut addr: Option<Address> = None;
        if let Some(def) = def {
            if def.def_addr != DefAddr::No {
                let effective = effective_addr(cp, def.def_addr);
                if let Some(ap) = effective {
                    let dot = match t {
                        Some(id) => self.mkaddr(id),
                        // Only reachable when the address starts with `"`,
                        // which replaces the file before reading the range.
                        None => Address {
                            r: Range::default(),
                            file: usize::MAX,
                        },
                    };
                    let a = self.cmd_address(&ap, dot, 0)?;
                    t = Some(a.file);
                    addr = Some(a);
                }
            }
        }

        match cmdc {
            '{' => {
                let tid = t.ok_or(EditError::NoCurrentView)?;
                let mut dot = self.mkaddr(tid);
                if let Some(ap) = &cp.addr {
                    dot = self.cmd_address(ap, dot, 0)?;
                }
                let mut sub = cp.cmd.as_deref();
                while let Some(c) = sub {
                    if dot.r.q1 > self.buf(dot.file).borrow().size_runes() {
                        return Err(EditError::AddressOutOfRange);
                    }
                    self.set_dot(dot.file, dot.r.q0, dot.r.q1);
                    self.cmd_exec(Some(dot.file), c)?;
                    sub = c.next.as_deref();
                }
                Ok(())
            }
            '\n' => self.cmd_newline(t.expect("checked"), addr),
            'a' => self.cmd_append(t.expect("checked"), cp, addr.expect("defaddr"), true),
            'i' => self.cmd_append(t.expect("checked"), cp, addr.expect("defaddr"), false),
            'c' => self.cmd_change(t.expect("checked"), cp, addr.expect("defaddr")),
            'd' => self.cmd_delete(t.expect("checked"), addr.expect("defaddr")),
            's' => self.cmd_substitute(t.expect("checked"), cp, addr.expect("defaddr")),
            'g' | 'v' => self.cmd_guard(t.expect("checked"), cp, addr.expect("defaddr")),
            'x' | 'y' => self.cmd_looper(t.expect("checked"), cp, addr.expect("defaddr")),
            'm' | 't' => self.cmd_move_copy(t.expect("checked"), cp, addr.expect("defaddr")),
            'u' => self.cmd_undo(t.expect("checked"), cp),
            'p' => self.cmd_print(t.expect("checked"), addr.expect("defaddr")),
            '=' => self.cmd_position(t.expect("checked"), cp, addr.expect("defaddr")),
            'w' => self.cmd_write(t.expect("checked"), cp, addr.expect("defaddr")),
            'e' => self.cmd_edit_file(t.expect("checked"), cp),
            'f' => self.cmd_set_name(t.expect("checked"), cp),
            'b' => self.cmd_switch_file(t, cp),
            'B' => self.cmd_open_files(t, cp),
            'D' => self.cmd_close_files(t, cp),
            'X' | 'Y' => self.cmd_file_loop(cp, cmdc == 'X'),
            '|' | '<' | '>' => {
                self.run_pipe(t.expect("checked"), cmdc, &cp.text, EditState::Inserting, addr)
            }
            _ => Err(EditError::BadSyntax(0)),
        }
    }

    // --- address evaluation -----------------------------------------------

    fn cmd_address(&mut self, ap: &Addr, mut a: Address, mut sign: i32) -> Result<Address> {
        let mut node = Some(ap);
        while let Some(n) = node {
            match n.typ {
                'l' => {
                    let buffer = self.buf(a.file);
                    a.r = line_addr(n.num, &mut buffer.borrow_mut(), a.r, sign)?;
                }
                '#' => {
                    let nr = self.buf(a.file).borrow().size_runes();
                    a.r = char_addr(n.num, a.r, sign, nr)?;
                }
                '.' => {
                    a = self.mkaddr(a.file);
                }
                '$' => {
                    let nr = self.buf(a.file).borrow().size_runes();
                    a.r = Range::new(nr, nr);
                }
                '\'' => return Err(EditError::Unsupported("mark addresses")),
                '*' => {
                    let nr = self.buf(a.file).borrow().size_runes();
                    a.r = Range::new(0, nr);
                }
                '/' | '?' => {
                    if n.typ == '?' {
                        sign = -sign;
                        if sign == 0 {
                            sign = -1;
                        }
                    }
                    let from = if sign >= 0 { a.r.q1 } else { a.r.q0 };
                    let re = n.re.as_deref().unwrap_or("");
                    let sel = self.next_match(a.file, re, from, sign)?;
                    a.r = sel.whole();
                }
                '"' => {
                    let re = n.re.as_deref().unwrap_or("");
                    a.file = self.match_file(re)?;
                    a = self.mkaddr(a.file);
                }
                ',' | ';' => {
                    let a1 = match &n.left {
                        Some(left) => self.cmd_address(left, a, 0)?,
                        None => Address {
                            r: Range::new(0, 0),
                            file: a.file,
                        },
                    };
                    if n.typ == ';' {
                        a = a1;
                        self.set_dot(a1.file, a1.r.q0, a1.r.q1);
                    } else {
                        // A file-switching left side carries its buffer into
                        // the right side and the default `$`.
                        a.file = a1.file;
                    }
                    let a2 = match &n.next {
                        Some(next) => self.cmd_address(next, a, 0)?,
                        None => {
                            let nr = self.buf(a.file).borrow().size_runes();
                            Address {
                                r: Range::new(0, nr),
                                file: a.file,
                            }
                        }
                    };
                    if a1.file != a2.file {
                        return Err(EditError::AddressesInDifferentFiles);
                    }
                    let out = Address {
                        r: Range::new(a1.r.q0, a2.r.q1),
                        file: a1.file,
                    };
                    if out.r.q1 < out.r.q0 {
                        return Err(EditError::AddressOutOfRange);
                    }
                    return Ok(out);
                }
                '+' | '-' => {
                    sign = if n.typ == '-' { -1 } else { 1 };
                    let advance_line = match n.next.as_deref() {
                        None => true,
                        Some(next) => next.typ == '+' || next.typ == '-',
                    };
                    if advance_line {
                        let buffer = self.buf(a.file);
                        a.r = line_addr(1, &mut buffer.borrow_mut(), a.r, sign)?;
                    }
                }
                _ => return Err(EditError::BadSyntax(0)),
            }
            node = n.next.as_deref();
        }
        Ok(a)
    }

    /// Find the next match for a `/re/` or `?re?` address, wrapping once
    /// around the buffer. An empty match at the starting position is
    /// skipped.
    fn next_match(&mut self, t: FileId, re: &str, from: usize, sign: i32) -> Result<RangeSet> {
        let pattern = Pattern::compile(re)?;
        let text = self.buf(t).borrow().text();
        let usable = |set: &RangeSet| !(set.whole().is_empty() && set.whole().q0 == from);
        if sign >= 0 {
            for set in pattern.find_forward(&text, from, None, Some(2)) {
                if usable(&set) {
                    return Ok(set);
                }
            }
            // Wrap to the start once.
            for set in pattern.find_forward(&text, 0, None, Some(2)) {
                if usable(&set) {
                    return Ok(set);
                }
            }
            Err(EditError::NoMatch)
        } else {
            let reject_at = |set: &RangeSet| set.whole().is_empty() && set.whole().q1 == from;
            if let Some(set) = pattern.find_backward(&text, from) {
                if !reject_at(&set) {
                    return Ok(set);
                }
            }
            // Skip the empty match at the starting position, wrapping to the
            // end once.
            let nr = self.buf(t).borrow().size_runes();
            let from2 = if from == 0 { nr } else { from - 1 };
            if let Some(set) = pattern.find_backward(&text, from2) {
                if !(set.whole().is_empty() && set.whole().q1 == from) {
                    return Ok(set);
                }
            }
            Err(EditError::NoMatch)
        }
    }

    /// The status line a buffer is matched against by `"re"` addresses and
    /// `X`/`Y` loops: dirty mark, `+`, current mark, then the name.
    fn tag_line(&self, id: FileId) -> String {
        let buffer = self.buf(id);
        let b = buffer.borrow();
        let dirty = if b.saveable_and_dirty() { '\'' } else { ' ' };
        let current = if self.current == Some(id) { '.' } else { ' ' };
        format!("{}{}{} {}\n", dirty, '+', current, b.name())
    }

    /// Resolve a `"re"` address to the unique buffer whose status line
    /// matches.
    fn match_file(&mut self, re: &str) -> Result<FileId> {
        let pattern = Pattern::compile(re)?;
        let mut found = None;
        for id in self.open_files() {
            if self.buf(id).borrow().is_dir_or_scratch() {
                continue;
            }
            let line = self.tag_line(id);
            if !pattern.find_forward(&line, 0, None, Some(1)).is_empty() {
                if found.is_some() {
                    return Err(EditError::MultipleFilesMatch(re.to_string()));
                }
                found = Some(id);
            }
        }
        found.ok_or_else(|| EditError::NoFileMatches(re.to_string()))
    }

    // --- executors --------------------------------------------------------

    fn cmd_append(&mut self, t: FileId, cp: &Cmd, addr: Address, after: bool) -> Result<()> {
        let p = if after { addr.r.q1 } else { addr.r.q0 };
        if !cp.text.is_empty() {
            let runes: Vec<char> = cp.text.chars().collect();
            self.buf(t).borrow_mut().journal_mut().insert(p, &runes);
        }
        self.set_dot(t, p, p);
        Ok(())
    }

    fn cmd_change(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let runes: Vec<char> = cp.text.chars().collect();
        self.buf(t)
            .borrow_mut()
            .journal_mut()
            .replace(addr.r.q0, addr.r.q1, &runes);
        self.set_dot(t, addr.r.q0, addr.r.q1);
        Ok(())
    }

    fn cmd_delete(&mut self, t: FileId, addr: Address) -> Result<()> {
        if addr.r.q1 > addr.r.q0 {
            self.buf(t)
                .borrow_mut()
                .journal_mut()
                .delete(addr.r.q0, addr.r.q1);
        }
        self.set_dot(t, addr.r.q0, addr.r.q0);
        Ok(())
    }

    fn cmd_substitute(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let pattern = Pattern::compile(cp.re.as_deref().unwrap_or(""))?;
        let text = self.buf(t).borrow().text();
        let runes: Vec<char> = text.chars().collect();
        let r = addr.r;

        // Gather the matches to substitute: the `num`-th onward (all of them
        // with the `g` flag, just the one without).
        let mut selected: Vec<RangeSet> = Vec::new();
        let mut n = cp.num;
        let mut op: Option<usize> = None;
        let mut p1 = r.q0;
        while p1 <= r.q1 {
            let sel = match pattern
                .find_forward(&text, p1, Some(r.q1), Some(1))
                .into_iter()
                .next()
            {
                Some(sel) => sel,
                None => break,
            };
            let w = sel.whole();
            if w.is_empty() {
                // Never rematch at the position just substituted, and never
                // match the phantom line after a trailing newline.
                if Some(w.q0) == op {
                    p1 = w.q0 + 1;
                    continue;
                }
                if w.q0 == r.q1 && w.q0 > r.q0 && runes.get(w.q0 - 1) == Some(&'\n') {
                    break;
                }
                p1 = w.q1 + 1;
            } else {
                p1 = w.q1;
            }
            op = Some(w.q1);
            n -= 1;
            if n > 0 {
                continue;
            }
            selected.push(sel);
        }

        let rhs: Vec<char> = cp.text.chars().collect();
        let mut substituted = false;
        for sel in &selected {
            let mut replacement: Vec<char> = Vec::new();
            let mut i = 0;
            while i < rhs.len() {
                let c = rhs[i];
                if c == '\\' && i + 1 < rhs.len() {
                    i += 1;
                    let esc = rhs[i];
                    if let Some(group) = esc.to_digit(10).filter(|d| (1..=9).contains(d)) {
                        let g = sel.group(group as usize);
                        if g.len() > MAX_REPLACEMENT {
                            return Err(EditError::ReplacementTooLong);
                        }
                        replacement.extend_from_slice(&runes[g.q0..g.q1]);
                    } else {
                        replacement.push(esc);
                    }
                } else if c == '&' {
                    let w = sel.whole();
                    if w.len() > MAX_REPLACEMENT {
                        return Err(EditError::ReplacementTooLong);
                    }
                    replacement.extend_from_slice(&runes[w.q0..w.q1]);
                } else {
                    replacement.push(c);
                }
                i += 1;
            }
            let w = sel.whole();
            self.buf(t)
                .borrow_mut()
                .journal_mut()
                .replace(w.q0, w.q1, &replacement);
            substituted = true;
            if !cp.flag {
                break;
            }
        }

        if !substituted && self.nest == 0 {
            return Err(EditError::NoSubstitution);
        }
        self.set_dot(t, r.q0, r.q1);
        Ok(())
    }

    fn cmd_guard(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let pattern = Pattern::compile(cp.re.as_deref().unwrap_or(""))?;
        let text = self.buf(t).borrow().text();
        let matched = !pattern
            .find_forward(&text, addr.r.q0, Some(addr.r.q1), Some(1))
            .is_empty();
        if matched == (cp.cmdc == 'g') {
            self.set_dot(t, addr.r.q0, addr.r.q1);
            if let Some(sub) = cp.cmd.as_deref() {
                self.cmd_exec(Some(t), sub)?;
            }
        }
        Ok(())
    }

    fn cmd_looper(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        self.nest += 1;
        let result = self.cmd_looper_inner(t, cp, addr);
        self.nest -= 1;
        result
    }

    fn cmd_looper_inner(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let is_x = cp.cmdc == 'x';
        let r = addr.r;
        let ranges = match cp.re.as_deref() {
            None => self.line_ranges(t, r)?,
            Some(re) => {
                let pattern = Pattern::compile(re)?;
                let text = self.buf(t).borrow().text();
                let matches = filter_spurious_empties(
                    pattern.find_forward(&text, r.q0, Some(r.q1), None),
                    r,
                    &text.chars().collect::<Vec<_>>(),
                );
                let mut ranges = Vec::new();
                if is_x {
                    ranges.extend(matches.iter().map(|s| s.whole()));
                } else {
                    // The complement: gaps between matches, including the
                    // final one up to the end of the address.
                    let mut op = r.q0;
                    for s in &matches {
                        let w = s.whole();
                        ranges.push(Range::new(op, w.q0));
                        op = w.q1;
                    }
                    ranges.push(Range::new(op, r.q1));
                }
                ranges
            }
        };
        let sub = cp.cmd.as_deref();
        for range in ranges {
            self.set_dot(t, range.q0, range.q1);
            if let Some(sub) = sub {
                self.cmd_exec(Some(t), sub)?;
            }
        }
        Ok(())
    }

    /// Ranges for the bare `x` loop: one per line overlapping the address.
    fn line_ranges(&mut self, t: FileId, r: Range) -> Result<Vec<Range>> {
        let buffer = self.buf(t);
        let mut ranges = Vec::new();
        let mut a3 = Range::new(r.q0, r.q0);
        let mut linesel = line_addr(0, &mut buffer.borrow_mut(), a3, 1)?;
        let mut p = r.q0;
        while p < r.q1 {
            a3.q0 = a3.q1;
            if p != r.q0 || linesel.q1 == p {
                linesel = line_addr(1, &mut buffer.borrow_mut(), a3, 1)?;
            }
            if linesel.q0 >= r.q1 {
                break;
            }
            if linesel.q1 >= r.q1 {
                linesel.q1 = r.q1;
            }
            if linesel.q1 > linesel.q0 && linesel.q0 >= a3.q1 && linesel.q1 > a3.q1 {
                a3 = linesel;
                ranges.push(linesel);
                p = a3.q1;
                continue;
            }
            break;
        }
        Ok(ranges)
    }

    fn cmd_move_copy(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let dot = self.mkaddr(t);
        let mtaddr = cp.mtaddr.as_deref().ok_or(EditError::BadSyntax(0))?;
        let addr2 = self.cmd_address(mtaddr, dot, 0)?;
        if cp.cmdc == 'm' {
            self.move_text(addr, addr2)
        } else {
            self.copy_text(addr, addr2);
            Ok(())
        }
    }

    fn copy_text(&mut self, addr: Address, addr2: Address) {
        let text = self
            .buf(addr.file)
            .borrow()
            .text_range(addr.r.q0, addr.r.q1);
        let runes: Vec<char> = text.chars().collect();
        self.buf(addr2.file)
            .borrow_mut()
            .journal_mut()
            .insert(addr2.r.q1, &runes);
    }

    fn move_text(&mut self, addr: Address, addr2: Address) -> Result<()> {
        if addr.file != addr2.file || addr.r.q1 <= addr2.r.q0 {
            self.buf(addr.file)
                .borrow_mut()
                .journal_mut()
                .delete(addr.r.q0, addr.r.q1);
            self.copy_text(addr, addr2);
        } else if addr.r.q0 >= addr2.r.q1 {
            self.copy_text(addr, addr2);
            self.buf(addr.file)
                .borrow_mut()
                .journal_mut()
                .delete(addr.r.q0, addr.r.q1);
        } else if addr.r == addr2.r {
            // Move to self: a silent no-op.
        } else {
            return Err(EditError::MoveOverlaps);
        }
        Ok(())
    }

    fn cmd_undo(&mut self, t: FileId, cp: &Cmd) -> Result<()> {
        let is_undo = cp.num >= 0;
        let steps = cp.num.unsigned_abs();
        for _ in 0..steps {
            if !self.undo_step(t, is_undo) {
                break;
            }
        }
        Ok(())
    }

    /// Undo or redo one sequence step: every buffer whose latest commit
    /// carries the current file's top sequence number is driven together, so
    /// a cross-file compound reverts as one.
    fn undo_step(&mut self, t: FileId, is_undo: bool) -> bool {
        let target = {
            let buffer = self.buf(t);
            let b = buffer.borrow();
            if is_undo {
                b.top_seq()
            } else {
                b.redo_seq()
            }
        };
        if target == 0 {
            return false;
        }
        for id in self.open_files() {
            loop {
                let buffer = self.buf(id);
                let mut b = buffer.borrow_mut();
                let seq = if is_undo { b.top_seq() } else { b.redo_seq() };
                if seq != target {
                    break;
                }
                let dot = b.undo(is_undo);
                drop(b);
                match dot {
                    Some((q0, q1)) => self.set_dot(id, q0, q1),
                    None => break,
                }
            }
        }
        true
    }

    fn cmd_print(&mut self, t: FileId, addr: Address) -> Result<()> {
        let text = self
            .buf(t)
            .borrow()
            .text_range(addr.r.q0, addr.r.q1);
        self.emit(&text);
        self.set_dot(t, addr.r.q0, addr.r.q1);
        Ok(())
    }

    fn cmd_newline(&mut self, t: FileId, addr: Option<Address>) -> Result<()> {
        let r = match addr {
            Some(a) => a.r,
            None => {
                // Extend dot to whole lines; if that changes nothing, move
                // to the next line.
                let dot = self.mkaddr(t);
                let buffer = self.buf(t);
                let mut start = line_addr(0, &mut buffer.borrow_mut(), dot.r, -1)?;
                let end = line_addr(0, &mut buffer.borrow_mut(), dot.r, 1)?;
                start.q1 = end.q1;
                if start == dot.r {
                    line_addr(1, &mut buffer.borrow_mut(), dot.r, 1)?
                } else {
                    start
                }
            }
        };
        self.set_dot(t, r.q0, r.q1);
        Ok(())
    }

    /// Count newlines in `[q0, q1)` and the rune offset into the line `q1`
    /// sits on.
    fn nl_count(&self, t: FileId, q0: usize, q1: usize) -> (usize, usize) {
        let buffer = self.buf(t);
        let b = buffer.borrow();
        let mut nl = 0;
        let mut start = q0;
        let text = b.text_range(q0, q1);
        for (i, c) in text.chars().enumerate() {
            if c == '\n' {
                nl += 1;
                start = q0 + i + 1;
            }
        }
        (nl, q1 - start)
    }

    fn cmd_position(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        let arg = cp.text.trim();
        let r = addr.r;
        let name = self.buf(t).borrow().name().to_string();
        let prefix = if name.is_empty() {
            String::new()
        } else {
            format!("{}:", name)
        };
        let line = match arg {
            "" => {
                let (mut l1, _) = self.nl_count(t, 0, r.q0);
                l1 += 1;
                let (nl, _) = self.nl_count(t, r.q0, r.q1);
                let mut l2 = l1 + nl;
                // A range ending just past a newline still ends on the
                // previous line.
                if r.q1 > r.q0 && r.q1 > 0 && self.buf(t).borrow_mut().rune_at(r.q1 - 1) == '\n' {
                    l2 -= 1;
                }
                if l2 != l1 {
                    format!("{}{},{}", prefix, l1, l2)
                } else {
                    format!("{}{}", prefix, l1)
                }
            }
            "#" => {
                if r.q1 != r.q0 {
                    format!("{}#{},#{}", prefix, r.q0, r.q1)
                } else {
                    format!("{}#{}", prefix, r.q0)
                }
            }
            "+" => {
                let (mut l1, r1) = self.nl_count(t, 0, r.q0);
                l1 += 1;
                let (nl, mut r2) = self.nl_count(t, r.q0, r.q1);
                let l2 = l1 + nl;
                if l2 == l1 {
                    r2 += r1;
                }
                if l2 != l1 {
                    format!("{}{}+#{},{}+#{}", prefix, l1, r1, l2, r2)
                } else {
                    format!("{}{}+#{}", prefix, l1, r1)
                }
            }
            _ => return Err(EditError::BadSyntax(0)),
        };
        self.emit(&line);
        Ok(())
    }

    fn cmd_write(&mut self, t: FileId, cp: &Cmd, addr: Address) -> Result<()> {
        if !self.buf(t).borrow().journal().is_empty() {
            return Err(EditError::UnwritablePending);
        }
        let name = self.cmd_name(t, &cp.text, false)?;
        if name.is_empty() {
            return Err(EditError::NoFileName);
        }
        let contents = self
            .buf(t)
            .borrow()
            .text_range(addr.r.q0, addr.r.q1);
        self.io.write(&name, &contents)?;

        let buffer = self.buf(t);
        let mut b = buffer.borrow_mut();
        let whole = addr.r.q0 == 0 && addr.r.q1 == b.size_runes();
        if whole && name == b.name() {
            b.set_hash(ContentHash::of(contents.as_bytes()));
            b.clean();
            drop(b);
            if let Ok(info) = self.io.stat(&name) {
                let buffer = self.buf(t);
                let mut b = buffer.borrow_mut();
                b.update_info(&name, info, self.io.as_mut())?;
            }
        } else {
            // The backing now differs from the buffer contents.
            b.set_modded();
        }
        Ok(())
    }

    /// Resolve the file-name argument of `e`/`f`/`w`/`b`, warning about
    /// duplicates and renaming the buffer when `set` asks for it (or when it
    /// had no name).
    fn cmd_name(&mut self, t: FileId, arg: &str, set: bool) -> Result<String> {
        let trimmed = arg.trim_start_matches([' ', '\t']);
        if trimmed.is_empty() {
            return Ok(self.buf(t).borrow().name().to_string());
        }
        let name = trimmed.to_string();
        for id in self.open_files() {
            if id != t && self.buf(id).borrow().name() == name {
                let msg = format!("warning: duplicate file name \"{}\"", name);
                self.emit(&msg);
            }
        }
        let mut set = set;
        if self.buf(t).borrow().name().is_empty() {
            set = true;
        }
        if set && name != self.buf(t).borrow().name() {
            let buffer = self.buf(t);
            let mut b = buffer.borrow_mut();
            b.mark(self.seq);
            b.set_name(&name);
            b.set_modded();
            b.commit();
        }
        Ok(name)
    }

    /// Refuse destructive file operations on a dirty buffer once; the
    /// refusal marks the buffer treat-as-clean so a repeat goes through.
    fn check_clean(&mut self, t: FileId) -> Result<()> {
        let buffer = self.buf(t);
        let mut b = buffer.borrow_mut();
        if b.is_dir_or_scratch() {
            return Ok(());
        }
        if b.treat_as_dirty() {
            let name = b.name().to_string();
            b.set_treat_as_clean();
            return Err(EditError::DirtyBuffer(name));
        }
        Ok(())
    }

    fn cmd_edit_file(&mut self, t: FileId, cp: &Cmd) -> Result<()> {
        self.check_clean(t)?;
        let q1 = self.buf(t).borrow().size_runes();
        let name = self.cmd_name(t, &cp.text, true)?;
        if name.is_empty() {
            return Err(EditError::NoFileName);
        }
        let same_name = name == self.buf(t).borrow().name();
        let mut reader = self.io.open_for_read(&name)?;
        if let Ok(info) = self.io.stat(&name) {
            if info.is_dir {
                return Err(EditError::IsDirectory(name));
            }
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let (runes, has_nulls) = runes_from_bytes(&data);
        self.buf(t)
            .borrow_mut()
            .journal_mut()
            .replace(0, q1, &runes);
        if has_nulls {
            let msg = format!("{}: NUL bytes elided", name);
            self.emit(&msg);
        } else if same_name {
            self.buf(t).borrow_mut().set_treat_as_clean();
        }
        Ok(())
    }

    fn cmd_set_name(&mut self, t: FileId, cp: &Cmd) -> Result<()> {
        self.cmd_name(t, &cp.text, true)?;
        let line = self.tag_line(t).trim_end().to_string();
        self.emit(&line);
        Ok(())
    }

    /// Expand a file-name list argument; a leading `<` runs the rest as a
    /// command and collects its output as the list.
    fn file_list(&mut self, t: Option<FileId>, arg: &str) -> Result<String> {
        let arg = arg.trim_start_matches([' ', '\t']);
        if arg.is_empty() {
            return Ok(String::new());
        }
        if let Some(rest) = arg.strip_prefix('<') {
            self.collection.clear();
            self.run_pipe_collect(t, rest)?;
            Ok(self.collection.iter().collect())
        } else {
            Ok(arg.to_string())
        }
    }

    fn cmd_switch_file(&mut self, t: Option<FileId>, cp: &Cmd) -> Result<()> {
        let list = self.file_list(t, &cp.text)?;
        let name = list.trim();
        if name.is_empty() {
            return Err(EditError::NoFileName);
        }
        let id = self
            .lookup_file(name)
            .ok_or_else(|| EditError::NoFileMatches(name.to_string()))?;
        self.current = Some(id);
        if self.nest == 0 {
            let line = self.tag_line(id).trim_end().to_string();
            self.emit(&line);
        }
        Ok(())
    }

    fn cmd_open_files(&mut self, t: Option<FileId>, cp: &Cmd) -> Result<()> {
        let list = self.file_list(t, &cp.text)?;
        if list.trim().is_empty() {
            return Err(EditError::NoFileName);
        }
        for word in list.split_whitespace() {
            self.open(word)?;
        }
        self.collection.clear();
        Ok(())
    }

    fn cmd_close_files(&mut self, t: Option<FileId>, cp: &Cmd) -> Result<()> {
        let list = self.file_list(t, &cp.text)?;
        if list.trim().is_empty() {
            let t = t.ok_or(EditError::NoCurrentView)?;
            self.close_file(t);
            return Ok(());
        }
        for word in list.split_whitespace().map(str::to_string).collect::<Vec<_>>() {
            let id = self
                .lookup_file(&word)
                .ok_or(EditError::NoFileMatches(word.clone()))?;
            self.close_file(id);
        }
        self.collection.clear();
        Ok(())
    }

    /// Close a file unless it is dirty and singly-observed; the refusal
    /// warns and arms treat-as-clean so a repeated close succeeds.
    fn close_file(&mut self, id: FileId) {
        if !self.buf(id).borrow().has_multiple_observers() {
            if let Err(err) = self.check_clean(id) {
                let msg = format!("?{}", err);
                self.emit(&msg);
                return;
            }
        }
        self.files[id] = None;
        if self.current == Some(id) {
            self.current = self.open_files().first().copied();
        }
    }

    fn cmd_file_loop(&mut self, cp: &Cmd, is_x: bool) -> Result<()> {
        if self.looping {
            return Err(EditError::NestedLooper(if is_x { 'X' } else { 'Y' }));
        }
        self.looping = true;
        self.nest += 1;
        let result = self.cmd_file_loop_inner(cp, is_x);
        self.looping = false;
        self.nest -= 1;
        result
    }

    fn cmd_file_loop_inner(&mut self, cp: &Cmd, is_x: bool) -> Result<()> {
        let pattern = match cp.re.as_deref() {
            Some(re) => Some(Pattern::compile(re)?),
            None => None,
        };
        let mut targets = Vec::new();
        for id in self.open_files() {
            // No auto-execution on unnamed buffers.
            if pattern.is_none() && self.buf(id).borrow().name().is_empty() {
                continue;
            }
            let selected = match &pattern {
                None => true,
                Some(p) => {
                    let line = self.tag_line(id);
                    !p.find_forward(&line, 0, None, Some(1)).is_empty() == is_x
                }
            };
            if selected {
                targets.push(id);
            }
        }
        let sub = match cp.cmd.as_deref() {
            Some(sub) => sub,
            None => return Ok(()),
        };
        for id in targets {
            if self.files[id].is_some() {
                self.cmd_exec(Some(id), sub)?;
            }
        }
        Ok(())
    }

    // --- pipes ------------------------------------------------------------

    /// Run `< command` in collecting state, gathering output into the
    /// engine's collection buffer.
    fn run_pipe_collect(&mut self, _t: Option<FileId>, arg: &str) -> Result<()> {
        let arg = arg.trim_start_matches([' ', '\t']);
        if arg.is_empty() {
            return Err(EditError::NoCommand('<'));
        }
        let saved = self.state;
        self.state = EditState::Collecting;
        let output = self.runner.run(arg, &self.dir, "");
        self.state = saved;
        let output = output?;
        self.collection.extend(output.chars());
        Ok(())
    }

    /// Run a `| < >` pipe against the addressed range. This is the engine's
    /// suspension point: the collaborator blocks until the child's output
    /// pipe closes.
    fn run_pipe(
        &mut self,
        t: FileId,
        cmdc: char,
        arg: &str,
        state: EditState,
        addr: Option<Address>,
    ) -> Result<()> {
        let arg = arg.trim_start_matches([' ', '\t']);
        if arg.is_empty() {
            return Err(EditError::NoCommand(cmdc));
        }
        let addr = addr.ok_or(EditError::NoCurrentView)?;
        let (q0, q1) = (addr.r.q0, addr.r.q1);
        self.set_dot(t, q0, q1);
        if cmdc == '<' || cmdc == '|' {
            self.buf(t).borrow_mut().journal_mut().delete(q0, q1);
        }
        let input = if cmdc == '|' || cmdc == '>' {
            self.buf(t).borrow().text_range(q0, q1)
        } else {
            String::new()
        };

        let saved = self.state;
        self.state = state;
        debug!(target: "edit.pipe", cmd = arg, "run");
        let output = self.runner.run(arg, &self.dir, &input);
        self.state = saved;
        let output = output?;

        if cmdc == '<' || cmdc == '|' {
            let (runes, _) = runes_from_bytes(output.as_bytes());
            self.buf(t).borrow_mut().journal_mut().insert(q0, &runes);
        } else if !output.is_empty() {
            self.emit(&output);
        }
        Ok(())
    }
}

/// Build the address to evaluate for a command, filling in the table
/// default when none (or only a bare `"file"` switch) was written.
fn effective_addr(cp: &Cmd, def: DefAddr) -> Option<Box<Addr>> {
    let default_node = || {
        let mut a = Addr::default();
        a.typ = if def == DefAddr::All { '*' } else { '.' };
        Box::new(a)
    };
    match &cp.addr {
        None if cp.cmdc == '\n' => None,
        None => Some(default_node()),
        Some(a) if a.typ == '"' && a.next.is_none() && cp.cmdc != '\n' => {
            let mut a = a.clone();
            a.next = Some(default_node());
            Some(a)
        }
        Some(a) => Some(a.clone()),
    }
}

/// Drop empty matches that ride on the tail of a previous match or sit on
/// the phantom line after a trailing newline; `x` loops and substitutions
/// would otherwise fire twice per line.
fn filter_spurious_empties(sets: Vec<RangeSet>, r: Range, runes: &[char]) -> Vec<RangeSet> {
    let mut kept = Vec::new();
    let mut op: Option<usize> = None;
    for set in sets {
        let w = set.whole();
        if w.is_empty() {
            if Some(w.q0) == op {
                continue;
            }
            if w.q0 == r.q1 && w.q0 > r.q0 && runes.get(w.q0 - 1) == Some(&'\n') {
                continue;
            }
        }
        op = Some(w.q1);
        kept.push(set);
    }
    kept
}
