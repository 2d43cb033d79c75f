//! Resource index
//!
//! Maps dense numeric ids and string aliases to resource definitions.
//!
//! # Index File Format
//! Pack indexes use the engine's property-file syntax, one resource per
//! line, ids assigned in file order starting at 0:
//! ```text
//! # alias = KIND:offset,size
//! title.background = TEXTURE:0,16384
//! title.theme      = SOUND:16384,88200
//! script.intro     = BINARY:104584,512
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use super::error::SourceError;
use super::propfile::parse_propfile;

/// Dense numeric resource id assigned by the source
pub type ResourceId = u32;

/// A lookup key: either a numeric id or an alias to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Id(ResourceId),
    Alias(String),
}

impl From<ResourceId> for ResourceKey {
    fn from(id: ResourceId) -> Self {
        ResourceKey::Id(id)
    }
}

impl From<&str> for ResourceKey {
    fn from(alias: &str) -> Self {
        ResourceKey::Alias(alias.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(alias: String) -> Self {
        ResourceKey::Alias(alias)
    }
}

impl From<&String> for ResourceKey {
    fn from(alias: &String) -> Self {
        ResourceKey::Alias(alias.clone())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Id(id) => write!(f, "#{}", id),
            ResourceKey::Alias(alias) => write!(f, "'{}'", alias),
        }
    }
}

/// Declared content kind of a packed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Sound,
    Binary,
    Unknown(String),
}

impl ResourceKind {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "TEXTURE" => ResourceKind::Texture,
            "SOUND" => ResourceKind::Sound,
            "BINARY" => ResourceKind::Binary,
            _ => ResourceKind::Unknown(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Texture => "TEXTURE",
            ResourceKind::Sound => "SOUND",
            ResourceKind::Binary => "BINARY",
            ResourceKind::Unknown(name) => name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a resource lives inside its pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDefinition {
    pub id: ResourceId,
    pub alias: Option<String>,
    /// Declared size of the raw data in bytes
    pub size: usize,
    /// Byte offset of the raw data within the pack blob
    pub offset: u64,
    pub kind: ResourceKind,
}

impl ResourceDefinition {
    /// Key suitable for error messages: the alias when present, else the id
    pub fn key(&self) -> ResourceKey {
        match &self.alias {
            Some(alias) => ResourceKey::Alias(alias.clone()),
            None => ResourceKey::Id(self.id),
        }
    }
}

/// Id-ordered definitions plus the alias table
#[derive(Debug, Default, Clone)]
pub struct ResourceIndex {
    definitions: Vec<ResourceDefinition>,
    aliases: HashMap<String, ResourceId>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a definition, assigning it the next id
    pub fn push(
        &mut self,
        alias: Option<&str>,
        kind: ResourceKind,
        offset: u64,
        size: usize,
    ) -> ResourceId {
        let id = self.definitions.len() as ResourceId;
        if let Some(alias) = alias {
            if let Some(previous) = self.aliases.insert(alias.to_string(), id) {
                log::warn!(
                    "Alias '{}' redefined: resource {} replaces {}",
                    alias,
                    id,
                    previous
                );
            }
        }
        self.definitions.push(ResourceDefinition {
            id,
            alias: alias.map(str::to_string),
            size,
            offset,
            kind,
        });
        id
    }

    /// Parse index text (see the module docs for the format).
    ///
    /// Malformed lines are skipped with a warning; they do not consume an id.
    pub fn parse(content: &str) -> Self {
        let mut index = Self::new();
        parse_propfile(content, &mut |line, alias, value| {
            match parse_location(value) {
                Some((kind, offset, size)) => {
                    if let ResourceKind::Unknown(name) = &kind {
                        log::warn!(
                            "Unknown resource kind '{}' for '{}' at line {}",
                            name,
                            alias,
                            line
                        );
                    }
                    index.push(Some(alias), kind, offset, size);
                }
                None => {
                    log::warn!(
                        "Invalid resource descriptor '{}' for '{}' at line {}",
                        value,
                        alias,
                        line
                    );
                }
            }
        });
        index
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SourceError::InvalidIndex(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    /// Render the index back to its text form. Only aliased entries can be
    /// written.
    pub fn to_index_string(&self) -> String {
        let mut out = String::from("# alias = KIND:offset,size\n");
        for def in &self.definitions {
            if let Some(alias) = &def.alias {
                out.push_str(&format!(
                    "{} = {}:{},{}\n",
                    alias, def.kind, def.offset, def.size
                ));
            }
        }
        out
    }

    pub fn by_id(&self, id: ResourceId) -> Option<&ResourceDefinition> {
        self.definitions.get(id as usize)
    }

    pub fn by_alias(&self, alias: &str) -> Option<&ResourceDefinition> {
        self.aliases.get(alias).and_then(|&id| self.by_id(id))
    }

    pub fn resolve(&self, key: &ResourceKey) -> Option<&ResourceDefinition> {
        match key {
            ResourceKey::Id(id) => self.by_id(*id),
            ResourceKey::Alias(alias) => self.by_alias(alias),
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in id order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.definitions.iter()
    }
}

/// Parse `KIND:offset,size`
fn parse_location(value: &str) -> Option<(ResourceKind, u64, usize)> {
    let (kind, span) = value.split_once(':')?;
    let (offset, size) = span.split_once(',')?;
    let offset = offset.trim().parse().ok()?;
    let size = size.trim().parse().ok()?;
    if kind.trim().is_empty() {
        return None;
    }
    Some((ResourceKind::parse(kind), offset, size))
}
