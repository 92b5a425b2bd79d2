#![warn(missing_docs)]
//! Edit Core - Headless Structural-Regex Editing Engine
//!
//! # Overview
//!
//! `edit-core` is the text editing engine of an Acme-style editor, without
//! the windows: piece-table rune buffers with grouped undo/redo, an observer
//! fan-out that keeps any number of views of one buffer consistent, and an
//! interpreter for the sam family of structural-regex edit commands
//! (`a c d i s g v x y m t u w = {}` plus the cross-file loops `X`/`Y` and
//! the pipes `| < >`).
//!
//! # Core Features
//!
//! - **Efficient Text Storage**: piece-table storage with O(1) undo and an
//!   append-only add buffer
//! - **Rune Addressing**: amortized O(1) rune↔byte cursor with an ASCII
//!   fast path
//! - **Shared Buffers**: synchronous observer broadcast; every view sees
//!   the same edit stream and keeps its own selection valid
//! - **Atomic Commands**: edits queue in a journal and apply
//!   highest-offset-first as one undo step, even across files
//! - **Structural Regex**: forward/backward matching with capture groups
//!   over buffer contents, in rune offsets
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Command Engine (parse, address, dispatch)  │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  Journal (pending edits, atomic apply)      │  ← Command Side Effects
//! ├─────────────────────────────────────────────┤
//! │  Observable Buffer (views + file identity)  │  ← Shared Model
//! ├─────────────────────────────────────────────┤
//! │  Rune Index (rune↔byte cursor)              │  ← Rune Access
//! ├─────────────────────────────────────────────┤
//! │  Piece Table Storage (undo/redo, cache)     │  ← Text Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use edit_core::{CommandEngine, MemIo, NullRunner};
//!
//! let mut engine = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
//! let id = engine.create_buffer("/tmp/demo", "a\nb\nc\n");
//!
//! // Append "!" to every line, as one undoable step.
//! engine.execute(",x/.*/{ a/!/ }").unwrap();
//! assert_eq!(engine.text(id), "a!\nb!\nc!\n");
//!
//! engine.execute("u").unwrap();
//! assert_eq!(engine.text(id), "a\nb\nc\n");
//! ```
//!
//! # Module Description
//!
//! - [`storage`] - piece-table storage with the reversible change log
//! - [`rune_index`] - rune-indexed cursor over a piece table
//! - [`buffer`] - the observable editable buffer and observer contract
//! - [`view`] - the selection-holding observer driven by the engine
//! - [`journal`] - pending-edit journal applied atomically per command
//! - [`address`] - ranges, capture sets and address arithmetic
//! - [`parser`] - the edit command grammar
//! - [`commands`] - the command engine and per-command executors
//! - [`search`] - structural regex matching in rune offsets
//! - [`io`] - file and process collaborator traits
//! - [`error`] - the `EditError` taxonomy
//!
//! # External Collaborators
//!
//! The engine owns no windows, no filesystem, and no processes. File
//! commands go through [`FileIo`], pipe commands through [`ProcessRunner`],
//! and views attach through [`BufferObserver`]. Everything else - layout,
//! input, drawing, serving - belongs to the embedding editor.

pub mod address;
pub mod buffer;
pub mod commands;
pub mod error;
pub mod io;
pub mod journal;
pub mod parser;
pub mod rune_index;
pub mod search;
pub mod storage;
pub mod view;

pub use address::{Addr, Range, RangeSet};
pub use buffer::{BufferObserver, ObservableBuffer, ObserverId, SharedObserver};
pub use commands::{Address, CommandEngine, EditState, FileId, NullRunner, OpenFile};
pub use error::{EditError, Result};
pub use io::{ContentHash, FileInfo, FileIo, MemIo, ProcessRunner};
pub use journal::{Journal, JournalEntry};
pub use parser::{parse_command_list, Cmd};
pub use rune_index::RuneIndex;
pub use search::Pattern;
pub use storage::{BufferKind, CommitSummary, Piece, PieceTable, UndoEvent};
pub use view::View;
