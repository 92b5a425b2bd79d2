//! Error types for the editing engine.
//!
//! Every failure a user can provoke from the edit command language is a
//! variant of [`EditError`]. Command execution catches these at the outermost
//! level, discards any pending journal entries, and surfaces the message as a
//! warning line; buffer state is never left half-mutated on the error path.
//!
//! Violated internal invariants (overlapping journal entries, cache-position
//! mismatches, out-of-buffer deletions) are programmer errors and panic
//! instead of returning an `EditError`.

use thiserror::Error;

/// Errors produced while parsing or executing edit commands.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("bad syntax in edit command at offset {0}")]
    /// The command string failed to parse; the payload is the rune offset of
    /// the offending character.
    BadSyntax(usize),

    #[error("bad regexp: {0}")]
    /// A regular expression failed to compile.
    BadRegex(String),

    #[error("no file matches \"{0}\"")]
    /// A `"re"` address or file loop matched no open buffer.
    NoFileMatches(String),

    #[error("too many files match \"{0}\"")]
    /// A `"re"` address matched more than one open buffer.
    MultipleFilesMatch(String),

    #[error("address out of range")]
    /// An evaluated address fell outside the buffer.
    AddressOutOfRange,

    #[error("no match for regexp")]
    /// A `/re/` or `?re?` address found no match.
    NoMatch,

    #[error("no substitution")]
    /// An `s` command at the outermost nesting level replaced nothing.
    NoSubstitution,

    #[error("move overlaps itself")]
    /// The source and destination of an `m` command overlap without being
    /// identical.
    MoveOverlaps,

    #[error("can't nest {0} command")]
    /// An `X` or `Y` loop was started while another one was running.
    NestedLooper(char),

    #[error("can't write file with pending modifications")]
    /// A `w` command ran while the buffer had unapplied journal entries.
    UnwritablePending,

    #[error("I/O error: {0}")]
    /// The I/O or process collaborator failed.
    Io(#[from] std::io::Error),

    #[error("replacement string too long in substitution")]
    /// A substitution right-hand side expanded past the replacement limit.
    ReplacementTooLong,

    #[error("no current view")]
    /// A command that needs a current view ran without one.
    NoCurrentView,

    #[error("no file name given")]
    /// A command that needs a file name got an empty one.
    NoFileName,

    #[error("{0} is a directory")]
    /// A file command was pointed at a directory.
    IsDirectory(String),

    #[error("file {0} modified")]
    /// A destructive file command was refused because the buffer holds
    /// unsaved changes. Repeating the command proceeds (the refusal marks the
    /// buffer treat-as-clean).
    DirtyBuffer(String),

    #[error("can't find observer to remove")]
    /// [`crate::ObservableBuffer::remove_observer`] was handed an observer
    /// that was never registered.
    UnknownObserver,

    #[error("no command specified for {0}")]
    /// A pipe command (`| < >`) had no command text.
    NoCommand(char),

    #[error("addresses in different files")]
    /// The two sides of a `,`/`;` compound resolved to different buffers.
    AddressesInDifferentFiles,

    #[error("unsupported: {0}")]
    /// The construct is recognized but not implemented (mark addresses).
    Unsupported(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EditError>;
