// Resource Module
// Resource sources, typed loaders and the two-queue resource caches

pub mod audio;
pub mod cache;
pub mod caching_manager;
pub mod error;
pub mod handle;
pub mod index;
pub mod loader;
pub mod propfile;
mod queue;
pub mod resource_type;
pub mod source;
mod table;


pub use cache::UnifiedCacheManager;
pub use caching_manager::{CachingResourcesManager, ResourceBytes};
pub use error::{CacheError, DecodeError, SourceError};
pub use handle::{PinnedResourceHandle, ResourceHandle};
pub use index::*;
pub use loader::{CacheLoadable, LoadContext};
pub use propfile::*;
pub use resource_type::*;
pub use source::{MemorySource, PackFile, ResourceSource};
pub use table::{CacheStats, EntryLocation};
