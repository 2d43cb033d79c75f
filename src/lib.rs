// assetcache library
// Resource sources, typed loaders and the two-queue resource caches

pub mod cli;
pub mod config;
pub mod logging;
pub mod resource;

pub use cli::Cli;
pub use config::CacheConfig;
pub use logging::LogLevel;
pub use resource::{CachingResourcesManager, UnifiedCacheManager};
