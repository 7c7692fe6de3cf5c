// Cached I/O
//
// Byte-level operations addressed by FileId. Each call goes through
// ensure_open first, so an evicted file is transparently reopened at the
// position it was evicted from.

use std::io::{Read, Seek, SeekFrom, Write};

use super::{CacheError, FileId, HandleCache};
use crate::opener::HandleOpener;

impl<O> HandleCache<O>
where
    O: HandleOpener,
    O::Handle: Read + Write + Seek,
{
    /// Read into `buf` from the file's current position
    ///
    /// # Returns
    /// Number of bytes read (0 at end of file)
    pub fn read(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, CacheError> {
        let handle = self.ensure_open(id)?;
        let result = handle.read(buf);
        self.io_result(id, result)
    }

    /// Read exactly `buf.len()` bytes from the file's current position
    pub fn read_exact(&mut self, id: FileId, buf: &mut [u8]) -> Result<(), CacheError> {
        let handle = self.ensure_open(id)?;
        let result = handle.read_exact(buf);
        self.io_result(id, result)
    }

    /// Write all of `data` at the file's current position
    pub fn write_all(&mut self, id: FileId, data: &[u8]) -> Result<(), CacheError> {
        let handle = self.ensure_open(id)?;
        let result = handle.write_all(data);
        self.io_result(id, result)
    }

    /// Move the file's position
    ///
    /// # Returns
    /// New absolute position
    pub fn seek(&mut self, id: FileId, pos: SeekFrom) -> Result<u64, CacheError> {
        let handle = self.ensure_open(id)?;
        let result = handle.seek(pos);
        self.io_result(id, result)
    }

    /// Current absolute position of the file
    ///
    /// An evicted file answers from its saved offset without being reopened.
    pub fn tell(&mut self, id: FileId) -> Result<u64, CacheError> {
        if !self.is_open(id)? {
            return Ok(self.saved_offset(id)?.unwrap_or(0));
        }
        let handle = self.ensure_open(id)?;
        let result = handle.stream_position();
        self.io_result(id, result)
    }

    /// Flush buffered writes of a live file
    ///
    /// A file without a live handle has nothing buffered and is left closed.
    pub fn flush(&mut self, id: FileId) -> Result<(), CacheError> {
        if !self.is_open(id)? {
            return Ok(());
        }
        let handle = self.ensure_open(id)?;
        let result = handle.flush();
        self.io_result(id, result)
    }

    fn io_result<T>(&self, id: FileId, result: std::io::Result<T>) -> Result<T, CacheError> {
        result.map_err(|source| CacheError::Io {
            path: self
                .file(id)
                .map(|file| file.path().to_path_buf())
                .unwrap_or_default(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::{CacheConfig, CacheError, HandleCache};
    use crate::opener::{LogicalFile, MemoryOpener, OpenMode};
    use std::io::SeekFrom;
    use std::path::Path;

    #[test]
    fn test_interleaved_reads_survive_eviction() {
        let opener = MemoryOpener::new();
        opener.insert("a", b"aaaa");
        opener.insert("b", b"bbbb");
        opener.insert("c", b"cccc");
        let mut cache = HandleCache::new(CacheConfig::new(1).unwrap(), opener);
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| cache.register(LogicalFile::read(*name)))
            .collect();

        let mut out = vec![Vec::new(); 3];
        for _ in 0..2 {
            for (i, id) in ids.iter().enumerate() {
                let mut buf = [0u8; 2];
                cache.read_exact(*id, &mut buf).expect("Failed to read");
                out[i].extend_from_slice(&buf);
            }
        }

        assert_eq!(out, vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]);
        assert_eq!(cache.opener().peak_handles(), 1);
    }

    #[test]
    fn test_write_seek_tell() {
        let mut cache = HandleCache::new(CacheConfig::new(1).unwrap(), MemoryOpener::new());
        let out = cache.register(LogicalFile::new("out", OpenMode::ReadWrite));
        let other = cache.register(LogicalFile::new("other", OpenMode::Write));

        cache.write_all(out, b"hello world").unwrap();
        assert_eq!(cache.tell(out).unwrap(), 11);

        // Evict, then tell answers from the saved offset without reopening
        cache.write_all(other, b"x").unwrap();
        let opens = cache.opener().opens().len();
        assert_eq!(cache.tell(out).unwrap(), 11);
        assert_eq!(cache.opener().opens().len(), opens);

        assert_eq!(cache.seek(out, SeekFrom::Start(6)).unwrap(), 6);
        let mut buf = [0u8; 5];
        cache.read_exact(out, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        cache.flush(out).unwrap();
    }

    #[test]
    fn test_write_past_addressable_offset_is_io_error() {
        let mut cache = HandleCache::new(CacheConfig::default(), MemoryOpener::new());
        let out = cache.register(LogicalFile::new("out", OpenMode::Write));

        assert_eq!(cache.seek(out, SeekFrom::Start(u64::MAX)).unwrap(), u64::MAX);
        match cache.write_all(out, b"x") {
            Err(CacheError::Io { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidInput)
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(cache.is_open(out).unwrap());
    }

    #[test]
    fn test_io_errors_name_the_file() {
        let opener = MemoryOpener::new();
        opener.insert("ro", b"data");
        let mut cache = HandleCache::new(CacheConfig::default(), opener);
        let ro = cache.register(LogicalFile::read("ro"));

        let err = cache.write_all(ro, b"x").expect_err("Write should fail");
        match err {
            CacheError::Io { path, .. } => assert_eq!(path, Path::new("ro")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
