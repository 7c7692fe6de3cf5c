// In-Memory Opener
//
// HandleOpener backed by byte vectors, with per-path failure injection and
// handle accounting. Meant for exercising cache behavior without touching
// the OS descriptor table.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use super::{HandleOpener, LogicalFile, OpenMode};

/// Largest size a write may grow an in-memory file to
pub const MAX_FILE_SIZE: usize = 1 << 30;

#[derive(Debug, Default)]
struct MemoryState {
    /// File contents by path
    files: HashMap<PathBuf, Vec<u8>>,
    /// Handles opened and not yet closed
    live: usize,
    /// Highest value `live` ever reached
    peak: usize,
    /// Every successful open as (path, is_first_open)
    opens: Vec<(PathBuf, bool)>,
    fail_open: HashSet<PathBuf>,
    fail_seek: HashSet<PathBuf>,
    fail_tell: HashSet<PathBuf>,
    fail_close: HashSet<PathBuf>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(what: &str, path: &Path) -> io::Error {
    io::Error::other(format!("injected {} failure: {:?}", what, path))
}

/// In-memory opener
///
/// Clones share the same files and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert<P: Into<PathBuf>>(&self, path: P, content: &[u8]) {
        lock(&self.state).files.insert(path.into(), content.to_vec());
    }

    /// Current content of a file
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Number of handles currently open
    pub fn live_handles(&self) -> usize {
        lock(&self.state).live
    }

    /// Highest number of handles ever open at once
    pub fn peak_handles(&self) -> usize {
        lock(&self.state).peak
    }

    /// Successful opens in order, as (path, is_first_open)
    pub fn opens(&self) -> Vec<(PathBuf, bool)> {
        lock(&self.state).opens.clone()
    }

    /// Make `open` fail for `path` while `fail` is set
    pub fn fail_open(&self, path: &Path, fail: bool) {
        toggle(&mut lock(&self.state).fail_open, path, fail);
    }

    /// Make `seek` fail for `path` while `fail` is set
    pub fn fail_seek(&self, path: &Path, fail: bool) {
        toggle(&mut lock(&self.state).fail_seek, path, fail);
    }

    /// Make `current_offset` fail for `path` while `fail` is set
    pub fn fail_tell(&self, path: &Path, fail: bool) {
        toggle(&mut lock(&self.state).fail_tell, path, fail);
    }

    /// Make `close` report an error for `path` while `fail` is set
    ///
    /// The handle is still gone afterwards.
    pub fn fail_close(&self, path: &Path, fail: bool) {
        toggle(&mut lock(&self.state).fail_close, path, fail);
    }
}

fn toggle(set: &mut HashSet<PathBuf>, path: &Path, on: bool) {
    if on {
        set.insert(path.to_path_buf());
    } else {
        set.remove(path);
    }
}

/// Live handle into a `MemoryOpener` file
#[derive(Debug)]
pub struct MemoryHandle {
    path: PathBuf,
    mode: OpenMode,
    pos: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == OpenMode::Write {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for reading",
            ));
        }
        let state = lock(&self.state);
        let data = state
            .files
            .get(&self.path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode == OpenMode::Read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for writing",
            ));
        }
        let mut state = lock(&self.state);
        let data = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        let start = usize::try_from(self.pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        if end > MAX_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::FileTooLarge,
                format!("in-memory files are limited to {} bytes", MAX_FILE_SIZE),
            ));
        }
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = lock(&self.state)
            .files
            .get(&self.path)
            .map_or(0, |data| data.len() as u64);

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.pos = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative offset",
            )),
        }
    }
}

impl HandleOpener for MemoryOpener {
    type Handle = MemoryHandle;

    fn open(&self, file: &LogicalFile, is_first_open: bool) -> io::Result<MemoryHandle> {
        let mut state = lock(&self.state);
        let path = file.path();

        if state.fail_open.contains(path) {
            return Err(injected("open", path));
        }
        if file.mode().is_write() && is_first_open {
            state.files.insert(path.to_path_buf(), Vec::new());
        } else if !state.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {:?}", path),
            ));
        }

        state.live += 1;
        state.peak = state.peak.max(state.live);
        state.opens.push((path.to_path_buf(), is_first_open));
        trace!("memory open {:?} (live={})", path, state.live);

        Ok(MemoryHandle {
            path: path.to_path_buf(),
            mode: file.mode(),
            pos: 0,
            state: Arc::clone(&self.state),
        })
    }

    fn close(&self, handle: MemoryHandle) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.live = state.live.saturating_sub(1);
        trace!("memory close {:?} (live={})", handle.path, state.live);

        if state.fail_close.contains(&handle.path) {
            return Err(injected("close", &handle.path));
        }
        Ok(())
    }

    fn seek(&self, handle: &mut MemoryHandle, offset: u64) -> io::Result<()> {
        if lock(&self.state).fail_seek.contains(&handle.path) {
            return Err(injected("seek", &handle.path));
        }
        handle.pos = offset;
        Ok(())
    }

    fn current_offset(&self, handle: &mut MemoryHandle) -> io::Result<u64> {
        if lock(&self.state).fail_tell.contains(&handle.path) {
            return Err(injected("tell", &handle.path));
        }
        Ok(handle.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_seek() {
        let opener = MemoryOpener::new();
        let file = LogicalFile::new("/mem/a", OpenMode::ReadWrite);

        let mut handle = opener.open(&file, true).expect("Failed to open");
        assert_eq!(handle.path(), Path::new("/mem/a"));
        handle.write_all(b"abcdef").unwrap();
        handle.seek(SeekFrom::Start(2)).unwrap();

        let mut buf = [0u8; 3];
        handle.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cde");
        assert_eq!(opener.current_offset(&mut handle).unwrap(), 5);

        opener.close(handle).unwrap();
        assert_eq!(opener.contents(Path::new("/mem/a")).unwrap(), b"abcdef");
    }

    #[test]
    fn test_handle_accounting() {
        let opener = MemoryOpener::new();
        opener.insert("/mem/a", b"a");
        opener.insert("/mem/b", b"b");

        let a = opener.open(&LogicalFile::read("/mem/a"), true).unwrap();
        let b = opener.open(&LogicalFile::read("/mem/b"), true).unwrap();
        assert_eq!(opener.live_handles(), 2);

        opener.close(a).unwrap();
        opener.close(b).unwrap();
        assert_eq!(opener.live_handles(), 0);
        assert_eq!(opener.peak_handles(), 2);
        assert_eq!(opener.opens().len(), 2);
    }

    #[test]
    fn test_injected_failures() {
        let opener = MemoryOpener::new();
        let path = Path::new("/mem/x");
        opener.insert(path, b"data");
        let file = LogicalFile::read(path);

        opener.fail_open(path, true);
        assert!(opener.open(&file, true).is_err());
        opener.fail_open(path, false);

        let mut handle = opener.open(&file, true).unwrap();
        opener.fail_seek(path, true);
        assert!(opener.seek(&mut handle, 1).is_err());

        // Close reports the error but the handle is gone
        opener.fail_close(path, true);
        assert!(opener.close(handle).is_err());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn test_write_at_huge_offset_fails() {
        let opener = MemoryOpener::new();
        let file = LogicalFile::new("/mem/big", OpenMode::Write);
        let mut handle = opener.open(&file, true).unwrap();

        handle.seek(SeekFrom::Start(u64::MAX)).unwrap();
        assert_eq!(handle.position(), u64::MAX);
        let err = handle.write(b"x").expect_err("Write should overflow");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        handle.seek(SeekFrom::Start(MAX_FILE_SIZE as u64)).unwrap();
        let err = handle.write(b"x").expect_err("Write should exceed the size cap");
        assert_eq!(err.kind(), io::ErrorKind::FileTooLarge);

        assert_eq!(opener.contents(Path::new("/mem/big")).unwrap(), b"");
        opener.close(handle).unwrap();
    }

    #[test]
    fn test_read_only_handle_rejects_writes() {
        let opener = MemoryOpener::new();
        opener.insert("/mem/ro", b"ro");

        let mut handle = opener.open(&LogicalFile::read("/mem/ro"), true).unwrap();
        let err = handle.write(b"x").expect_err("Write should fail");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
