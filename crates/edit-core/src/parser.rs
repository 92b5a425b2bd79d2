//! Edit command parser.
//!
//! Turns a command line like `,x/.*<slash>{ a/!/ }` into a [`Cmd`] tree. The
//! grammar is table-driven: each command character has a [`CmdDef`] entry
//! describing which arguments it takes (text block, regexp, target address,
//! count, rest-of-line token) and what its default address and default
//! sub-command are. Execution lives in [`crate::CommandEngine`]; the parser
//! produces the AST only.
//!
//! Failures are reported as [`EditError::BadSyntax`] carrying the rune
//! offset of the offending character.

use crate::address::Addr;
use crate::error::{EditError, Result};

/// Token terminator sets for rest-of-line and word arguments.
const LINEX: &str = "\n";
const WORDX: &str = " \t\n";

/// A parsed edit command.
///
/// `cmd` holds the sub-command of loopers and `{}` blocks; `next` chains the
/// members of a `{}` block.
#[derive(Debug, Clone, Default)]
pub struct Cmd {
    /// Command character (`'\n'` for the bare-address advance command).
    pub cmdc: char,
    /// Address the command applies to, if one was written.
    pub addr: Option<Box<Addr>>,
    /// Target address of `m` and `t`.
    pub mtaddr: Option<Box<Addr>>,
    /// Pattern argument of `s g v x y X Y`.
    pub re: Option<String>,
    /// Text argument (`a c i` bodies, `s` replacement, token arguments).
    pub text: String,
    /// Sub-command of loopers, guards and `{}` blocks.
    pub cmd: Option<Box<Cmd>>,
    /// Next command inside a `{}` block.
    pub next: Option<Box<Cmd>>,
    /// Count argument (`s` match index, `u` step count).
    pub num: i32,
    /// `g` suffix of the `s` command.
    pub flag: bool,
}

/// Default address a command gets when none is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefAddr {
    /// The command takes no address at all.
    No,
    /// Defaults to dot.
    Dot,
    /// Defaults to `0,$`.
    All,
}

/// Count-argument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Count {
    None,
    Unsigned,
    Signed,
}

/// Grammar entry for one command character.
pub(crate) struct CmdDef {
    pub cmdc: char,
    /// Takes an `a`/`c`/`i`-style text argument.
    pub text: bool,
    /// Takes a delimited pattern.
    pub regexp: bool,
    /// Takes an `m`/`t` target address.
    pub mtaddr: bool,
    /// Sub-command inserted when a looper or guard has none.
    pub def_cmd: Option<char>,
    pub def_addr: DefAddr,
    pub count: Count,
    /// Terminators of a rest-of-line token argument.
    pub token: Option<&'static str>,
}

macro_rules! cmd_def {
    ($c:expr, $text:expr, $re:expr, $mt:expr, $defcmd:expr, $defaddr:expr, $count:expr, $token:expr) => {
        CmdDef {
            cmdc: $c,
            text: $text,
            regexp: $re,
            mtaddr: $mt,
            def_cmd: $defcmd,
            def_addr: $defaddr,
            count: $count,
            token: $token,
        }
    };
}

pub(crate) const CMD_TAB: &[CmdDef] = &[
    cmd_def!('\n', false, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('a', true, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('b', false, false, false, None, DefAddr::No, Count::None, Some(LINEX)),
    cmd_def!('B', false, false, false, None, DefAddr::No, Count::None, Some(LINEX)),
    cmd_def!('c', true, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('d', false, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('D', false, false, false, None, DefAddr::No, Count::None, Some(LINEX)),
    cmd_def!('e', false, false, false, None, DefAddr::No, Count::None, Some(WORDX)),
    cmd_def!('f', false, false, false, None, DefAddr::No, Count::None, Some(WORDX)),
    cmd_def!('g', false, true, false, Some('p'), DefAddr::Dot, Count::None, None),
    cmd_def!('i', true, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('m', false, false, true, None, DefAddr::Dot, Count::None, None),
    cmd_def!('p', false, false, false, None, DefAddr::Dot, Count::None, None),
    cmd_def!('s', false, true, false, None, DefAddr::Dot, Count::Unsigned, None),
    cmd_def!('t', false, false, true, None, DefAddr::Dot, Count::None, None),
    cmd_def!('u', false, false, false, None, DefAddr::No, Count::Signed, None),
    cmd_def!('v', false, true, false, Some('p'), DefAddr::Dot, Count::None, None),
    cmd_def!('w', false, false, false, None, DefAddr::All, Count::None, Some(WORDX)),
    cmd_def!('x', false, true, false, Some('p'), DefAddr::Dot, Count::None, None),
    cmd_def!('y', false, true, false, Some('p'), DefAddr::Dot, Count::None, None),
    cmd_def!('=', false, false, false, None, DefAddr::Dot, Count::None, Some(LINEX)),
    cmd_def!('X', false, true, false, Some('f'), DefAddr::No, Count::None, None),
    cmd_def!('Y', false, true, false, Some('f'), DefAddr::No, Count::None, None),
    cmd_def!('<', false, false, false, None, DefAddr::Dot, Count::None, Some(LINEX)),
    cmd_def!('|', false, false, false, None, DefAddr::Dot, Count::None, Some(LINEX)),
    cmd_def!('>', false, false, false, None, DefAddr::Dot, Count::None, Some(LINEX)),
];

/// Look up the grammar entry for a command character.
pub(crate) fn lookup(cmdc: char) -> Option<&'static CmdDef> {
    CMD_TAB.iter().find(|def| def.cmdc == cmdc)
}

/// Parse a full command string into its top-level commands.
pub fn parse_command_list(input: &str) -> Result<Vec<Cmd>> {
    let mut text: Vec<char> = input.chars().collect();
    if text.last() != Some(&'\n') {
        text.push('\n');
    }
    let mut parser = Parser { text, pos: 0 };
    let mut cmds = Vec::new();
    loop {
        match parser.parse_cmd(0)? {
            Some(cmd) => cmds.push(cmd),
            None => break,
        }
    }
    Ok(cmds)
}

struct Parser {
    text: Vec<char>,
    pos: usize,
}

impl Parser {
    fn err<T>(&self) -> Result<T> {
        Err(EditError::BadSyntax(self.pos.min(self.text.len())))
    }

    fn getch(&mut self) -> Option<char> {
        let c = self.text.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn nextc(&self) -> Option<char> {
        self.text.get(self.pos).copied()
    }

    fn ungetch(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Skip blanks (not newlines); returns the character now under the
    /// cursor without consuming it.
    fn skipbl(&mut self) -> Option<char> {
        while matches!(self.nextc(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
        self.nextc()
    }

    /// Require a command terminator, allowing leading blanks: a newline or
    /// `;` (consumed), end of input, or a closing `}` (left for the block
    /// parser).
    fn atnl(&mut self) -> Result<()> {
        self.skipbl();
        match self.getch() {
            Some('\n') | Some(';') | None => Ok(()),
            Some('}') => {
                self.ungetch();
                Ok(())
            }
            Some(_) => {
                self.ungetch();
                self.err()
            }
        }
    }

    fn getnum(&mut self, signed: bool) -> i32 {
        self.skipbl();
        let mut sign = 1;
        if signed && self.nextc() == Some('-') {
            sign = -1;
            self.getch();
        }
        match self.nextc() {
            Some(c) if c.is_ascii_digit() => {}
            _ => return sign, // no number defaults to 1
        }
        let mut n: i32 = 0;
        while let Some(c) = self.nextc() {
            match c.to_digit(10) {
                Some(d) => {
                    n = n.saturating_mul(10).saturating_add(d as i32);
                    self.getch();
                }
                None => break,
            }
        }
        sign * n
    }

    /// Collect a delimited pattern. `\delim` escapes the delimiter; other
    /// backslash pairs pass through for the regex compiler. The closing
    /// delimiter is consumed; a terminating newline is not.
    fn getregexp(&mut self, delim: char) -> Result<String> {
        let mut buf = String::new();
        loop {
            let c = match self.getch() {
                Some(c) => c,
                None => break,
            };
            if c == '\\' {
                if self.nextc() == Some(delim) {
                    buf.push(self.getch().expect("peeked"));
                } else if self.nextc() == Some('\\') {
                    buf.push(c);
                    buf.push(self.getch().expect("peeked"));
                } else {
                    buf.push(c);
                }
                continue;
            }
            if c == delim {
                break;
            }
            if c == '\n' {
                self.ungetch();
                break;
            }
            buf.push(c);
        }
        Ok(buf)
    }

    /// Collect a replacement or text body up to `delim`. Escapes: `\n` is a
    /// newline, `\delim` the delimiter; any other pair passes through. Stops
    /// before a bare newline; the delimiter, if present, is left for the
    /// caller.
    fn getrhs(&mut self, delim: char) -> Result<String> {
        let mut buf = String::new();
        loop {
            let c = match self.getch() {
                Some(c) => c,
                None => break,
            };
            if c == delim {
                self.ungetch(); // let the caller skip over it
                break;
            }
            if c == '\n' {
                self.ungetch();
                break;
            }
            if c == '\\' {
                match self.getch() {
                    None => return self.err(),
                    Some('\n') => {
                        self.ungetch();
                        buf.push('\\');
                    }
                    Some('n') => buf.push('\n'),
                    Some(c2) if c2 == delim => buf.push(delim),
                    Some(c2) => {
                        buf.push('\\');
                        buf.push(c2);
                    }
                }
                continue;
            }
            buf.push(c);
        }
        Ok(buf)
    }

    /// Collect an `a`/`c`/`i` text argument: either a delimited body on the
    /// command line, or a block of lines terminated by a lone `.`.
    fn collecttext(&mut self) -> Result<String> {
        if self.skipbl() == Some('\n') {
            self.getch();
            let mut body = String::new();
            loop {
                let mut line = String::new();
                loop {
                    match self.getch() {
                        Some('\n') | None => break,
                        Some(c) => line.push(c),
                    }
                }
                if line == "." {
                    return Ok(body);
                }
                if self.pos >= self.text.len() && line.is_empty() {
                    return Ok(body);
                }
                body.push_str(&line);
                body.push('\n');
            }
        }
        let delim = match self.getch() {
            Some(c) => c,
            None => return Ok(String::new()),
        };
        if !ok_delim(delim) {
            return self.err();
        }
        let body = self.getrhs(delim)?;
        if self.nextc() == Some(delim) {
            self.getch();
        }
        self.atnl()?;
        Ok(body)
    }

    /// Collect a rest-of-line token; leading blanks are preserved for the
    /// file-name commands to trim.
    fn collecttoken(&mut self, end: &str) -> Result<String> {
        let mut s = String::new();
        while matches!(self.nextc(), Some(' ') | Some('\t')) {
            s.push(self.getch().expect("peeked"));
        }
        let mut last = None;
        while let Some(c) = self.getch() {
            if end.contains(c) {
                last = Some(c);
                break;
            }
            s.push(c);
        }
        if last != Some('\n') {
            self.atnl()?;
        }
        Ok(s)
    }

    // --- addresses --------------------------------------------------------

    fn simpleaddr(&mut self) -> Result<Option<Box<Addr>>> {
        let mut addr = Addr::default();
        match self.skipbl() {
            Some('#') => {
                self.getch();
                addr.typ = '#';
                addr.num = self.getnum(false) as usize;
            }
            Some(c) if c.is_ascii_digit() => {
                addr.typ = 'l';
                addr.num = self.getnum(false) as usize;
            }
            Some(c @ ('/' | '?' | '"')) => {
                self.getch();
                addr.typ = c;
                addr.re = Some(self.getregexp(c)?);
            }
            Some(c @ ('.' | '$' | '+' | '-' | '\'')) => {
                self.getch();
                addr.typ = c;
            }
            _ => return Ok(None),
        }
        addr.next = self.simpleaddr()?;
        if let Some(next) = &addr.next {
            match next.typ {
                '.' | '$' | '\'' => {
                    if addr.typ != '"' {
                        return self.err();
                    }
                }
                '"' => return self.err(),
                'l' | '#' if addr.typ == '"' => {}
                'l' | '#' | '/' | '?' => {
                    if addr.typ != '+' && addr.typ != '-' {
                        // Insert the implicit '+'.
                        let mut plus = Box::new(Addr::default());
                        plus.typ = '+';
                        plus.next = addr.next.take();
                        addr.next = Some(plus);
                    }
                }
                '+' | '-' => {}
                _ => return self.err(),
            }
        }
        Ok(Some(Box::new(addr)))
    }

    fn compoundaddr(&mut self) -> Result<Option<Box<Addr>>> {
        let left = self.simpleaddr()?;
        let op = match self.skipbl() {
            Some(c @ (',' | ';')) => c,
            _ => return Ok(left),
        };
        self.getch();
        let mut addr = Addr::default();
        addr.typ = op;
        addr.left = left;
        addr.next = self.compoundaddr()?;
        if let Some(next) = &addr.next {
            if (next.typ == ',' || next.typ == ';') && next.left.is_none() {
                return self.err();
            }
        }
        Ok(Some(Box::new(addr)))
    }

    // --- commands ---------------------------------------------------------

    fn parse_cmd(&mut self, nest: usize) -> Result<Option<Cmd>> {
        let mut cmd = Cmd::default();
        cmd.addr = self.compoundaddr()?;
        if self.skipbl().is_none() {
            return Ok(None);
        }
        let c = match self.getch() {
            Some(c) => c,
            None => return Ok(None),
        };
        cmd.cmdc = c;
        if let Some(def) = lookup(c) {
            if c == '\n' {
                // Bare address: the advance command works it out itself.
                return Ok(Some(cmd));
            }
            if def.def_addr == DefAddr::No && cmd.addr.is_some() {
                return self.err();
            }
            if def.count != Count::None {
                cmd.num = self.getnum(def.count == Count::Signed);
            }
            if def.regexp {
                // `x` and `X` without a pattern fall back to their built-in
                // defaults (per line / every file); everything else requires
                // one.
                let next = self.nextc();
                if !matches!(c, 'x' | 'X')
                    || !matches!(next, Some(' ') | Some('\t') | Some('\n'))
                {
                    self.skipbl();
                    let delim = match self.getch() {
                        Some(d) => d,
                        None => return self.err(),
                    };
                    if delim == '\n' || !ok_delim(delim) {
                        return self.err();
                    }
                    cmd.re = Some(self.getregexp(delim)?);
                    if c == 's' {
                        cmd.text = self.getrhs(delim)?;
                        if self.nextc() == Some(delim) {
                            self.getch();
                        }
                        if self.nextc() == Some('g') {
                            self.getch();
                            cmd.flag = true;
                        }
                    }
                }
            }
            if def.mtaddr {
                cmd.mtaddr = match self.simpleaddr()? {
                    Some(addr) => Some(addr),
                    None => return self.err(),
                };
            }
            if let Some(def_cmd) = def.def_cmd {
                if self.skipbl() == Some('\n') {
                    self.getch();
                    let mut sub = Cmd::default();
                    sub.cmdc = def_cmd;
                    cmd.cmd = Some(Box::new(sub));
                } else {
                    cmd.cmd = match self.parse_cmd(nest)? {
                        Some(sub) => Some(Box::new(sub)),
                        None => return self.err(),
                    };
                }
            } else if def.text {
                cmd.text = self.collecttext()?;
            } else if let Some(token) = def.token {
                cmd.text = self.collecttoken(token)?;
            } else {
                self.atnl()?;
            }
            Ok(Some(cmd))
        } else {
            match c {
                '{' => {
                    let mut subs = Vec::new();
                    loop {
                        if self.skipbl() == Some('\n') {
                            self.getch();
                        }
                        match self.parse_cmd(nest + 1)? {
                            None => break,
                            Some(sub) => subs.push(sub),
                        }
                    }
                    let mut chain: Option<Box<Cmd>> = None;
                    for sub in subs.into_iter().rev() {
                        let mut boxed = Box::new(sub);
                        boxed.next = chain;
                        chain = Some(boxed);
                    }
                    cmd.cmd = chain;
                    Ok(Some(cmd))
                }
                '}' => {
                    self.atnl()?;
                    if nest == 0 {
                        return self.err();
                    }
                    Ok(None)
                }
                _ => self.err(),
            }
        }
    }
}

/// Delimiters must not be letters, digits or backslashes.
fn ok_delim(c: char) -> bool {
    c != '\\' && !c.is_ascii_alphanumeric()
}
