// Bounded Handle Cache
//
// Lets clients treat any number of logical files as open while holding at
// most `max_open` live handles. Files are evicted least-recently-used first
// and reopened on demand at the position they were evicted from.
//
// The cache is not internally synchronized. Every mutating call takes
// `&mut self`; callers that share a cache across threads wrap it in their
// own lock, which keeps eviction order exactly the order of calls.

pub mod error;
pub mod io;
pub mod lru;

use tracing::{debug, trace};

use crate::opener::{HandleOpener, LogicalFile};

pub use error::CacheError;
pub use lru::LruRegistry;

/// Default ceiling on live handles
pub const DEFAULT_MAX_OPEN: usize = 10;

/// Cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of simultaneously live handles
    max_open: usize,
}

impl CacheConfig {
    /// Create a configuration with the given ceiling
    ///
    /// # Errors
    /// `InvalidConfig` if `max_open` is zero.
    pub fn new(max_open: usize) -> Result<Self, CacheError> {
        if max_open == 0 {
            return Err(CacheError::InvalidConfig(
                "max_open must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_open })
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN,
        }
    }
}

/// Identifier of a logical file registered with a cache
///
/// Carries a generation so an id kept past `forget` is rejected instead of
/// aliasing whatever record reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    slot: usize,
    generation: u32,
}

/// Access counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `ensure_open` calls served by an already live handle
    pub hits: u64,
    /// `ensure_open` calls that had to open a handle
    pub misses: u64,
    /// Handles closed to make room
    pub evictions: u64,
    /// Successful opens, first opens and reopens alike
    pub opens: u64,
    /// Opens that failed, including failed offset restores
    pub open_failures: u64,
}

/// Per-file cache state
struct Entry<H> {
    file: LogicalFile,
    generation: u32,
    handle: Option<H>,
    /// Position to restore on reopen; set only by eviction
    saved_offset: Option<u64>,
    opened_once: bool,
}

/// Bounded handle cache
pub struct HandleCache<O: HandleOpener> {
    config: CacheConfig,
    opener: O,
    /// Arena of registered files; `None` marks a free slot
    entries: Vec<Option<Entry<O::Handle>>>,
    free_slots: Vec<usize>,
    /// Generation to hand out next time a slot is filled
    generations: Vec<u32>,
    registry: LruRegistry,
    /// Number of live handles
    count: usize,
    stats: CacheStats,
    /// Close errors hit while evicting or discarding a handle whose offset
    /// could not be restored, kept until the client drains them
    eviction_failures: Vec<CacheError>,
}

impl<O: HandleOpener> HandleCache<O> {
    /// Create a cache
    ///
    /// # Arguments
    /// * `config` - Cache configuration (ceiling on live handles)
    /// * `opener` - Backend used to open, close and position handles
    pub fn new(config: CacheConfig, opener: O) -> Self {
        debug!("HandleCache created with max_open={}", config.max_open);
        Self {
            config,
            opener,
            entries: Vec::new(),
            free_slots: Vec::new(),
            generations: Vec::new(),
            registry: LruRegistry::with_capacity(config.max_open),
            count: 0,
            stats: CacheStats::default(),
            eviction_failures: Vec::new(),
        }
    }

    /// Register a logical file
    ///
    /// The file starts closed; nothing is opened until the first access.
    pub fn register(&mut self, file: LogicalFile) -> FileId {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.entries.push(None);
                self.generations.push(0);
                self.entries.len() - 1
            }
        };
        let generation = self.generations[slot];

        trace!("Registered {:?} in slot {}", file.path(), slot);
        self.entries[slot] = Some(Entry {
            file,
            generation,
            handle: None,
            saved_offset: None,
            opened_once: false,
        });

        FileId { slot, generation }
    }

    /// Release a file's handle and drop its record
    ///
    /// The record is dropped even when the close fails, in which case the
    /// close error is returned instead of the description.
    pub fn forget(&mut self, id: FileId) -> Result<LogicalFile, CacheError> {
        let released = self.release(id);

        let slot = self.slot_of(id)?;
        let entry = self.entries[slot]
            .take()
            .ok_or(CacheError::UnknownFile(id))?;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_slots.push(slot);

        released?;
        Ok(entry.file)
    }

    /// Get the live handle of a logical file, opening it if needed
    ///
    /// A file that already holds a handle is moved to the most recently
    /// used position without any I/O. Otherwise room is made by evicting
    /// the least recently used evictable file, the file is opened and, if
    /// it was evicted earlier, put back at the offset it had then.
    ///
    /// # Errors
    /// * `Exhausted` - the cache is full and every live file is pinned
    /// * `OpenFailed` - the opener failed; the file stays closed
    /// * `SeekFailed` - the saved offset could not be restored (fatal)
    /// * `TellFailed` - the eviction victim's offset could not be saved
    pub fn ensure_open(&mut self, id: FileId) -> Result<&mut O::Handle, CacheError> {
        let slot = self.slot_of(id)?;

        if self.entry(slot)?.handle.is_some() {
            self.registry.promote(slot);
            self.stats.hits += 1;
            return self.live_handle(slot);
        }

        self.stats.misses += 1;
        if self.count >= self.config.max_open {
            self.evict_one()?;
        }

        let entry = match self.entries[slot].as_mut() {
            Some(entry) => entry,
            None => return Err(CacheError::UnknownFile(id)),
        };
        let is_first_open = !entry.opened_once;

        let mut handle = match self.opener.open(&entry.file, is_first_open) {
            Ok(handle) => handle,
            Err(source) => {
                self.stats.open_failures += 1;
                return Err(CacheError::OpenFailed {
                    path: entry.file.path().to_path_buf(),
                    source,
                });
            }
        };

        if let Some(offset) = entry.saved_offset {
            if let Err(source) = self.opener.seek(&mut handle, offset) {
                // The fresh handle never enters the cache.
                if let Err(source) = self.opener.close(handle) {
                    self.eviction_failures.push(CacheError::CloseFailed {
                        path: entry.file.path().to_path_buf(),
                        source,
                    });
                }
                self.stats.open_failures += 1;
                return Err(CacheError::SeekFailed {
                    path: entry.file.path().to_path_buf(),
                    offset,
                    source,
                });
            }
            debug!("Reopened {:?} at offset {}", entry.file.path(), offset);
        }

        entry.handle = Some(handle);
        entry.saved_offset = None;
        entry.opened_once = true;
        self.registry.promote(slot);
        self.count += 1;
        self.stats.opens += 1;
        self.check_counts();

        self.live_handle(slot)
    }

    /// Close a file's handle
    ///
    /// No-op if the file holds no handle. The file leaves the cache even if
    /// the close reports an error; a later access reopens it from offset 0.
    pub fn release(&mut self, id: FileId) -> Result<(), CacheError> {
        let slot = self.slot_of(id)?;
        self.release_slot(slot)
    }

    /// Close every live handle, most recently used first
    ///
    /// All files leave the cache regardless of close errors.
    ///
    /// # Errors
    /// `ReleaseAll` carrying every close failure.
    pub fn release_all(&mut self) -> Result<(), CacheError> {
        let mut failures = Vec::new();

        while let Some(slot) = self.registry.head() {
            if let Err(e) = self.release_slot(slot) {
                failures.push(e);
            }
            // Only reachable with broken bookkeeping; unlink so the drain ends.
            if self.registry.is_head(slot) {
                self.registry.remove(slot)?;
                self.count = self.count.saturating_sub(1);
            }
        }

        debug!("Released all handles ({} close failures)", failures.len());

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::ReleaseAll(failures))
        }
    }

    /// Pin or unpin a file
    ///
    /// Pinned files are never chosen for eviction.
    pub fn set_evictable(&mut self, id: FileId, evictable: bool) -> Result<(), CacheError> {
        let slot = self.slot_of(id)?;
        self.entry_mut(slot)?.file.set_evictable(evictable);
        Ok(())
    }

    /// Whether the file currently holds a live handle
    pub fn is_open(&self, id: FileId) -> Result<bool, CacheError> {
        let slot = self.slot_of(id)?;
        Ok(self.entry(slot)?.handle.is_some())
    }

    /// Whether the file is the most recently used live file
    pub fn is_head(&self, id: FileId) -> Result<bool, CacheError> {
        let slot = self.slot_of(id)?;
        Ok(self.registry.is_head(slot))
    }

    /// Offset the file will be restored to on its next open
    pub fn saved_offset(&self, id: FileId) -> Result<Option<u64>, CacheError> {
        let slot = self.slot_of(id)?;
        Ok(self.entry(slot)?.saved_offset)
    }

    /// Description of a registered file
    pub fn file(&self, id: FileId) -> Result<&LogicalFile, CacheError> {
        let slot = self.slot_of(id)?;
        Ok(&self.entry(slot)?.file)
    }

    /// Number of live handles
    pub fn live_count(&self) -> usize {
        self.count
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        self.entries.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_open(&self) -> usize {
        self.config.max_open
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Ids of live files, most recently used first
    pub fn live_files(&self) -> Vec<FileId> {
        self.registry
            .iter()
            .filter_map(|slot| {
                self.entries[slot].as_ref().map(|entry| FileId {
                    slot,
                    generation: entry.generation,
                })
            })
            .collect()
    }

    /// Take the close errors collected while evicting
    ///
    /// Also holds the close error of a reopened handle that was discarded
    /// because its saved offset could not be restored.
    pub fn take_eviction_failures(&mut self) -> Vec<CacheError> {
        std::mem::take(&mut self.eviction_failures)
    }

    /// Close the least recently used evictable handle
    ///
    /// The victim's offset is saved before it is closed. A failed close is
    /// recorded and the slot reclaimed anyway; refusing would let one bad
    /// descriptor block the cache for good.
    fn evict_one(&mut self) -> Result<(), CacheError> {
        let entries = &self.entries;
        let victim = self.registry.least_recently_used_where(|slot| {
            entries[slot]
                .as_ref()
                .is_some_and(|entry| entry.file.is_evictable())
        });
        let slot = match victim {
            Some(slot) => slot,
            None => return Err(CacheError::Exhausted { live: self.count }),
        };

        let entry = match self.entries[slot].as_mut() {
            Some(entry) => entry,
            None => return Err(CacheError::InvariantViolation("LRU ring holds a free slot")),
        };
        let Some(handle) = entry.handle.as_mut() else {
            return Err(CacheError::InvariantViolation(
                "LRU ring holds a file without a handle",
            ));
        };

        let offset = self
            .opener
            .current_offset(handle)
            .map_err(|source| CacheError::TellFailed {
                path: entry.file.path().to_path_buf(),
                source,
            })?;
        entry.saved_offset = Some(offset);

        if let Some(handle) = entry.handle.take() {
            if let Err(source) = self.opener.close(handle) {
                self.eviction_failures.push(CacheError::CloseFailed {
                    path: entry.file.path().to_path_buf(),
                    source,
                });
            }
        }
        debug!("Evicted {:?} at offset {}", entry.file.path(), offset);

        self.registry.remove(slot)?;
        self.count -= 1;
        self.stats.evictions += 1;
        self.check_counts();
        Ok(())
    }

    fn release_slot(&mut self, slot: usize) -> Result<(), CacheError> {
        let entry = match self.entries[slot].as_mut() {
            Some(entry) => entry,
            None => return Err(CacheError::InvariantViolation("released a free slot")),
        };
        let Some(handle) = entry.handle.take() else {
            return Ok(());
        };
        entry.saved_offset = None;

        let closed = self.opener.close(handle).map_err(|source| CacheError::CloseFailed {
            path: entry.file.path().to_path_buf(),
            source,
        });
        trace!("Released {:?}", entry.file.path());

        self.registry.remove(slot)?;
        self.count -= 1;
        self.check_counts();
        closed
    }

    fn slot_of(&self, id: FileId) -> Result<usize, CacheError> {
        match self.entries.get(id.slot) {
            Some(Some(entry)) if entry.generation == id.generation => Ok(id.slot),
            _ => Err(CacheError::UnknownFile(id)),
        }
    }

    fn entry(&self, slot: usize) -> Result<&Entry<O::Handle>, CacheError> {
        self.entries[slot]
            .as_ref()
            .ok_or(CacheError::InvariantViolation("slot unexpectedly free"))
    }

    fn entry_mut(&mut self, slot: usize) -> Result<&mut Entry<O::Handle>, CacheError> {
        self.entries[slot]
            .as_mut()
            .ok_or(CacheError::InvariantViolation("slot unexpectedly free"))
    }

    fn live_handle(&mut self, slot: usize) -> Result<&mut O::Handle, CacheError> {
        self.entry_mut(slot)?
            .handle
            .as_mut()
            .ok_or(CacheError::InvariantViolation("live file lost its handle"))
    }

    fn check_counts(&self) {
        debug_assert_eq!(self.count, self.registry.len());
        debug_assert!(self.count <= self.config.max_open);
    }
}

impl<O: HandleOpener> Drop for HandleCache<O> {
    fn drop(&mut self) {
        // Handles must go back through the opener; close errors have no one
        // left to report to.
        let _ = self.release_all();
    }
}
