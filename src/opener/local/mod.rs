// Local Filesystem Opener
//
// Implements the HandleOpener trait on top of std::fs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{HandleOpener, LogicalFile, OpenMode};

/// Live handle to a local file
#[derive(Debug)]
pub struct LocalHandle {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl LocalHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File metadata through the open handle
    pub fn metadata(&self) -> io::Result<fs::Metadata> {
        self.file.metadata()
    }
}

impl Read for LocalHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LocalHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for LocalHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Local filesystem opener
#[derive(Debug, Clone)]
pub struct LocalOpener {
    /// Sync writable files to disk before closing them
    sync_on_close: bool,
}

impl LocalOpener {
    /// Create an opener that syncs writable files on close
    pub fn new() -> Self {
        Self {
            sync_on_close: true,
        }
    }

    /// Enable or disable syncing writable files on close
    ///
    /// Dropping a `File` swallows write-back errors, so syncing is the only
    /// way a close of a written file can report one.
    pub fn sync_on_close(mut self, sync: bool) -> Self {
        self.sync_on_close = sync;
        self
    }

    fn options(mode: OpenMode, is_first_open: bool) -> OpenOptions {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Write => {
                options.write(true);
            }
            OpenMode::ReadWrite => {
                options.read(true).write(true);
            }
        }
        // Writable files are created once; later reopens must not clobber
        // what was written before the eviction.
        if mode.is_write() && is_first_open {
            options.create(true).truncate(true);
        }
        options
    }
}

impl Default for LocalOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleOpener for LocalOpener {
    type Handle = LocalHandle;

    fn open(&self, file: &LogicalFile, is_first_open: bool) -> io::Result<LocalHandle> {
        let handle = Self::options(file.mode(), is_first_open).open(file.path())?;

        debug!(
            "OPEN: {:?} mode={:?} first_open={}",
            file.path(),
            file.mode(),
            is_first_open
        );

        Ok(LocalHandle {
            file: handle,
            path: file.path().to_path_buf(),
            writable: file.mode().is_write(),
        })
    }

    fn close(&self, handle: LocalHandle) -> io::Result<()> {
        let LocalHandle {
            file,
            path,
            writable,
        } = handle;

        if writable && self.sync_on_close {
            file.sync_data()?;
        }
        drop(file);

        debug!("CLOSE: {:?}", path);
        Ok(())
    }

    fn seek(&self, handle: &mut LocalHandle, offset: u64) -> io::Result<()> {
        handle.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn current_offset(&self, handle: &mut LocalHandle) -> io::Result<u64> {
        handle.file.stream_position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Helper: Create a temp dir holding one file with the given content
    fn create_test_file(content: &[u8]) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, content).expect("Failed to write test file");
        (temp_dir, path)
    }

    #[test]
    fn test_open_read_and_seek() {
        let (_temp_dir, path) = create_test_file(b"Hello, cache!");
        let opener = LocalOpener::new();
        let file = LogicalFile::read(&path);

        let mut handle = opener.open(&file, true).expect("Failed to open");
        assert_eq!(handle.path(), path.as_path());
        opener.seek(&mut handle, 7).expect("Failed to seek");
        assert_eq!(opener.current_offset(&mut handle).unwrap(), 7);

        let mut rest = String::new();
        handle.read_to_string(&mut rest).expect("Failed to read");
        assert_eq!(rest, "cache!");

        opener.close(handle).expect("Failed to close");
    }

    #[test]
    fn test_open_missing_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let opener = LocalOpener::new();
        let file = LogicalFile::read(temp_dir.path().join("missing.bin"));

        let err = opener.open(&file, true).expect_err("Open should fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_first_open_creates_and_reopen_preserves() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("out.bin");
        let opener = LocalOpener::new();
        let file = LogicalFile::new(&path, OpenMode::Write);

        let mut handle = opener.open(&file, true).expect("Failed to create");
        handle.write_all(b"first").expect("Failed to write");
        opener.close(handle).expect("Failed to close");

        // Reopen must not truncate
        let mut handle = opener.open(&file, false).expect("Failed to reopen");
        opener.seek(&mut handle, 5).expect("Failed to seek");
        handle.write_all(b"+second").expect("Failed to write");
        opener.close(handle).expect("Failed to close");

        assert_eq!(fs::read(&path).unwrap(), b"first+second");
    }

    #[test]
    fn test_first_open_truncates_existing() {
        let (_temp_dir, path) = create_test_file(b"stale content");
        let opener = LocalOpener::new().sync_on_close(false);
        let file = LogicalFile::new(&path, OpenMode::ReadWrite);

        let handle = opener.open(&file, true).expect("Failed to open");
        assert_eq!(handle.metadata().unwrap().len(), 0);
        opener.close(handle).expect("Failed to close");
    }

    #[test]
    fn test_reopen_of_deleted_writable_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let opener = LocalOpener::new();
        let file = LogicalFile::new(temp_dir.path().join("gone.bin"), OpenMode::Write);

        let result = opener.open(&file, false);
        assert!(result.is_err(), "Reopen should not create the file");
    }
}
