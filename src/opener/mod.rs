// Handle Openers
//
// The OS-facing side of the cache. An opener turns a logical file
// description into a live handle and performs the few primitive calls the
// cache needs on it (close, seek, tell). The cache itself never touches
// storage.

pub mod local;
pub mod memory;

use std::io;
use std::path::{Path, PathBuf};

pub use local::LocalOpener;
pub use memory::{MemoryHandle, MemoryOpener};

/// Access mode of a logical file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only
    Read,
    /// Write only; created (truncated) on first open
    Write,
    /// Read and write; created (truncated) on first open
    ReadWrite,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Logical file description
///
/// What the client knows about a file it wants to treat as open: where it
/// lives, how to open it, and whether the cache may close it under
/// pressure. The live handle and saved position are kept by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    path: PathBuf,
    mode: OpenMode,
    evictable: bool,
}

impl LogicalFile {
    /// Describe an evictable file
    pub fn new<P: Into<PathBuf>>(path: P, mode: OpenMode) -> Self {
        Self {
            path: path.into(),
            mode,
            evictable: true,
        }
    }

    /// Describe an evictable read-only file
    pub fn read<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, OpenMode::Read)
    }

    /// Mark the file as pinned (never chosen for eviction)
    pub fn pinned(mut self) -> Self {
        self.evictable = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_evictable(&self) -> bool {
        self.evictable
    }

    pub(crate) fn set_evictable(&mut self, evictable: bool) {
        self.evictable = evictable;
    }
}

/// Handle opener trait
///
/// Backends implement this to give the cache live handles. Calls are
/// synchronous; the cache serializes them through `&mut self` on its side.
pub trait HandleOpener {
    /// Live OS-level handle
    type Handle;

    /// Open the file described by `file`
    ///
    /// # Arguments
    /// * `file` - Logical file to open
    /// * `is_first_open` - True the first time this logical file is opened.
    ///   Writable files are created on the first open and reopened without
    ///   truncation afterwards.
    fn open(&self, file: &LogicalFile, is_first_open: bool) -> io::Result<Self::Handle>;

    /// Close a handle
    fn close(&self, handle: Self::Handle) -> io::Result<()>;

    /// Position a handle at an absolute byte offset
    fn seek(&self, handle: &mut Self::Handle, offset: u64) -> io::Result<()>;

    /// Current absolute byte offset of a handle
    fn current_offset(&self, handle: &mut Self::Handle) -> io::Result<u64>;
}
