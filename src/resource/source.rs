//! Resource sources - where the caches get raw bytes from
//!
//! A source owns a `ResourceIndex` and hands out the exact byte span of a
//! resource by id. Two sources are provided:
//! - `MemorySource`: an in-memory pack, also used to write pack files
//! - `PackFile`: an index file plus a data blob on disk
//!
//! # Example
//! ```
//! use assetcache::resource::{MemorySource, ResourceKind, ResourceSource};
//!
//! let mut pack = MemorySource::new();
//! let id = pack.add(Some("script.intro"), ResourceKind::Binary, b"hello".to_vec());
//! assert_eq!(pack.resource_data(id).unwrap(), b"hello");
//! ```

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::error::SourceError;
use super::index::{ResourceDefinition, ResourceId, ResourceIndex, ResourceKey, ResourceKind};

/// Read-only provider of resource definitions and raw bytes.
pub trait ResourceSource: Send + Sync {
    fn definition_by_id(&self, id: ResourceId) -> Option<&ResourceDefinition>;

    fn definition_by_alias(&self, alias: &str) -> Option<&ResourceDefinition>;

    /// Exact raw bytes of a resource
    fn resource_data(&self, id: ResourceId) -> Result<Vec<u8>, SourceError>;

    /// Translate an id or alias into its definition
    fn resolve(&self, key: &ResourceKey) -> Result<&ResourceDefinition, SourceError> {
        let found = match key {
            ResourceKey::Id(id) => self.definition_by_id(*id),
            ResourceKey::Alias(alias) => self.definition_by_alias(alias),
        };
        found.ok_or_else(|| SourceError::NotFound(key.clone()))
    }

    /// Declared size of a resource, for pre-admission checks
    fn declared_size(&self, key: &ResourceKey) -> Result<usize, SourceError> {
        self.resolve(key).map(|def| def.size)
    }
}

/// In-memory pack: one contiguous blob plus its index.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    index: ResourceIndex,
    blob: Vec<u8>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource, returning its id
    pub fn add(&mut self, alias: Option<&str>, kind: ResourceKind, data: Vec<u8>) -> ResourceId {
        let offset = self.blob.len() as u64;
        let id = self.index.push(alias, kind, offset, data.len());
        self.blob.extend_from_slice(&data);
        id
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }

    /// Write `<base>.pak` and `<base>.idx`, returning the index path.
    ///
    /// Anonymous resources cannot be named in an index file and are
    /// rejected.
    pub fn write_pack<P: AsRef<Path>>(&self, base: P) -> Result<PathBuf, SourceError> {
        if let Some(def) = self.index.iter().find(|d| d.alias.is_none()) {
            return Err(SourceError::InvalidIndex(format!(
                "resource {} has no alias and cannot be written to an index",
                def.id
            )));
        }

        let base = base.as_ref();
        let data_path = base.with_extension("pak");
        let index_path = base.with_extension("idx");
        fs::write(&data_path, &self.blob).map_err(|source| SourceError::Write {
            path: data_path.clone(),
            source,
        })?;
        fs::write(&index_path, self.index.to_index_string()).map_err(|source| {
            SourceError::Write {
                path: index_path.clone(),
                source,
            }
        })?;
        Ok(index_path)
    }
}

impl ResourceSource for MemorySource {
    fn definition_by_id(&self, id: ResourceId) -> Option<&ResourceDefinition> {
        self.index.by_id(id)
    }

    fn definition_by_alias(&self, alias: &str) -> Option<&ResourceDefinition> {
        self.index.by_alias(alias)
    }

    fn resource_data(&self, id: ResourceId) -> Result<Vec<u8>, SourceError> {
        let def = self
            .index
            .by_id(id)
            .ok_or(SourceError::NotFound(ResourceKey::Id(id)))?;
        let start = def.offset as usize;
        let end = start + def.size;
        self.blob
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(SourceError::Truncated {
                id,
                expected: def.size,
                actual: self.blob.len().saturating_sub(start),
            })
    }
}

/// Pack on disk: `<name>.idx` describing spans of `<name>.pak`.
///
/// Every read opens the blob afresh, so a `PackFile` can be shared across
/// threads without any locking of its own.
#[derive(Debug)]
pub struct PackFile {
    index: ResourceIndex,
    data_path: PathBuf,
}

impl PackFile {
    /// Open a pack from its index path; the blob sits next to it with the
    /// `.pak` extension.
    pub fn open<P: AsRef<Path>>(index_path: P) -> Result<Self, SourceError> {
        let index_path = index_path.as_ref();
        let index = ResourceIndex::from_file(index_path)?;
        let data_path = index_path.with_extension("pak");
        if !data_path.is_file() {
            return Err(SourceError::InvalidIndex(format!(
                "pack data not found: {}",
                data_path.display()
            )));
        }
        log::debug!(
            "Opened pack {} ({} resources)",
            data_path.display(),
            index.len()
        );
        Ok(Self { index, data_path })
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn read_span(&self, id: ResourceId, offset: u64, size: usize) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(&self.data_path)?;
        // Never trust the index for more than the blob actually holds
        let available = file.metadata()?.len().saturating_sub(offset).min(size as u64);
        let mut buffer = Vec::with_capacity(available as usize);
        if available > 0 {
            file.seek(SeekFrom::Start(offset))?;
            file.take(available).read_to_end(&mut buffer)?;
        }
        if buffer.len() < size {
            log::warn!(
                "Short read for resource {}: {} of {} bytes",
                id,
                buffer.len(),
                size
            );
        }
        Ok(buffer)
    }
}

impl ResourceSource for PackFile {
    fn definition_by_id(&self, id: ResourceId) -> Option<&ResourceDefinition> {
        self.index.by_id(id)
    }

    fn definition_by_alias(&self, alias: &str) -> Option<&ResourceDefinition> {
        self.index.by_alias(alias)
    }

    fn resource_data(&self, id: ResourceId) -> Result<Vec<u8>, SourceError> {
        let def = self
            .index
            .by_id(id)
            .ok_or(SourceError::NotFound(ResourceKey::Id(id)))?;
        let data = self
            .read_span(id, def.offset, def.size)
            .map_err(|source| SourceError::Io { id, source })?;
        if data.len() != def.size {
            return Err(SourceError::Truncated {
                id,
                expected: def.size,
                actual: data.len(),
            });
        }
        Ok(data)
    }
}
