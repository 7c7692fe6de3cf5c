// Handle Cache - Library
//
// Bounded cache of OS file handles for a binary-file abstraction layer.
// Clients register any number of logical files and access them as if they
// were all open; the cache keeps at most `max_open` real handles live and
// reopens evicted files at the position they were left at.

pub mod cache;
pub mod opener;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheError, CacheStats, FileId, HandleCache, DEFAULT_MAX_OPEN};
pub use opener::{HandleOpener, LocalOpener, LogicalFile, MemoryOpener, OpenMode};
