//! Error types for the resource layer
//!
//! `SourceError` comes from the pack/index side, `DecodeError` from the
//! typed loaders, and `CacheError` is what the cache stores hand back to
//! callers. Capacity problems are kept apart from the rest so callers can
//! fall back to the uncached path.

use std::io;
use std::path::PathBuf;

use super::index::{ResourceId, ResourceKey};

/// Errors raised by a resource source (index lookup or data read).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Resource not found: {0}")]
    NotFound(ResourceKey),

    #[error("I/O error reading resource {id}: {source}")]
    Io {
        id: ResourceId,
        #[source]
        source: io::Error,
    },

    #[error("Resource {id} is truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        id: ResourceId,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid index: {0}")]
    InvalidIndex(String),
}

/// Errors raised while turning raw bytes into a cached resource.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Ogg Vorbis decode failed: {0}")]
    Vorbis(#[from] lewton::VorbisError),

    #[error("Invalid resource data: {0}")]
    InvalidData(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Errors returned by the cache stores.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Resource {id} is cached as {cached}, requested as {requested}")]
    TypeMismatch {
        id: ResourceId,
        cached: &'static str,
        requested: &'static str,
    },

    #[error("Resource {id} needs {size} bytes, more than the cache capacity of {capacity}")]
    CapacityExceeded {
        id: ResourceId,
        size: usize,
        capacity: usize,
    },

    #[error("Out of cache memory for resource {id}: need {requested} bytes, only {available} reclaimable")]
    OutOfMemory {
        id: ResourceId,
        requested: usize,
        available: usize,
    },

    #[error("Failed to decode resource {id}: {source}")]
    Decode {
        id: ResourceId,
        #[source]
        source: DecodeError,
    },
}

impl CacheError {
    /// True for the allocation failures that the uncached path can satisfy.
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            CacheError::CapacityExceeded { .. } | CacheError::OutOfMemory { .. }
        )
    }

    /// True when the id or alias is unknown to the source.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Source(SourceError::NotFound(_)))
    }
}
