//! External collaborator interfaces.
//!
//! The engine never touches the filesystem or spawns processes itself; file
//! commands (`w`, `e`, `B`) and pipe commands (`|`, `<`, `>`) go through the
//! two traits here. [`MemIo`] is an in-memory [`FileIo`] used by the test
//! suite and by embedders that have no disk.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::io::{self, Read};
use std::time::SystemTime;

/// Stat result for a backing file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, if the backing reports one.
    pub modified: Option<SystemTime>,
    /// True if the path names a directory.
    pub is_dir: bool,
}

/// Digest of file contents, used to decide whether a backing file still
/// matches what was loaded from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Hash a byte string.
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = DefaultHasher::new();
        h.write(bytes);
        Self(h.finish())
    }
}

/// Filesystem collaborator invoked by file commands.
pub trait FileIo {
    /// Open `path` for reading.
    fn open_for_read(&mut self, path: &str) -> io::Result<Box<dyn Read>>;

    /// Write `contents` to `path`, returning the number of bytes written.
    fn write(&mut self, path: &str, contents: &str) -> io::Result<usize>;

    /// Stat `path`.
    fn stat(&mut self, path: &str) -> io::Result<FileInfo>;

    /// Hash the current on-disk contents of `path`.
    fn hash_file(&mut self, path: &str) -> io::Result<ContentHash> {
        let mut reader = self.open_for_read(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(ContentHash::of(&bytes))
    }
}

/// Process collaborator invoked by `|`, `<` and `>` commands.
///
/// `run` is the engine's only suspension point: it blocks until the child's
/// output pipe closes, standing in for the rendezvous the interactive editor
/// performs. Cancellation, if any, is the collaborator's business (kill the
/// child and return what was captured).
pub trait ProcessRunner {
    /// Run `cmd` in directory `dir`, feeding `input` to its stdin, and
    /// return the captured stdout once the pipe closes.
    fn run(&mut self, cmd: &str, dir: &str, input: &str) -> io::Result<String>;
}

/// In-memory [`FileIo`] implementation.
#[derive(Debug, Default)]
pub struct MemIo {
    files: HashMap<String, Vec<u8>>,
}

impl MemIo {
    /// Create an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate `path` with `contents`.
    pub fn put(&mut self, path: &str, contents: &str) {
        self.files.insert(path.to_string(), contents.as_bytes().to_vec());
    }

    /// Current contents of `path`, if present.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|v| v.as_slice())
    }
}

impl FileIo for MemIo {
    fn open_for_read(&mut self, path: &str) -> io::Result<Box<dyn Read>> {
        match self.files.get(path) {
            Some(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file {:?}", path),
            )),
        }
    }

    fn write(&mut self, path: &str, contents: &str) -> io::Result<usize> {
        self.files
            .insert(path.to_string(), contents.as_bytes().to_vec());
        Ok(contents.len())
    }

    fn stat(&mut self, path: &str) -> io::Result<FileInfo> {
        match self.files.get(path) {
            Some(bytes) => Ok(FileInfo {
                size: bytes.len() as u64,
                modified: None,
                is_dir: false,
            }),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file {:?}", path),
            )),
        }
    }
}
