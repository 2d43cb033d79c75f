use std::path::Path;

use anyhow::{Context, Result};

use crate::resource::PropertyFile;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Cache budgets, read from the `cache.*` keys of a settings file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Budget for evictable entries (A1 + A-main)
    pub max_volatile_size: usize,
    /// Budget for entries admitted as persistent
    pub max_persistent_size: usize,
    /// Largest single resource the persistent tier accepts
    pub max_single_persistent_size: usize,
    /// Share of the volatile budget reserved for once-touched entries
    pub a1_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_volatile_size: 256 * MIB,
            max_persistent_size: 64 * MIB,
            max_single_persistent_size: 8 * MIB,
            a1_ratio: 0.25,
        }
    }
}

impl CacheConfig {
    /// Volatile-only budget with the default A1 ratio
    pub fn with_volatile_size(max_volatile_size: usize) -> Self {
        Self {
            max_volatile_size,
            ..Self::default()
        }
    }

    /// Byte budget of the A1 queue
    pub fn target_a1_size(&self) -> usize {
        (self.max_volatile_size as f64 * self.a1_ratio) as usize
    }

    /// Apply the `cache.*` keys of a property file on top of `self`
    pub fn merge_properties(mut self, props: &PropertyFile) -> Result<Self> {
        for (key, value) in props.iter() {
            match key.to_ascii_lowercase().as_str() {
                "cache.volatile_size" => {
                    self.max_volatile_size =
                        parse_size(value).with_context(|| format!("Invalid {}", key))?;
                }
                "cache.persistent_size" => {
                    self.max_persistent_size =
                        parse_size(value).with_context(|| format!("Invalid {}", key))?;
                }
                "cache.persistent_max_entry" => {
                    self.max_single_persistent_size =
                        parse_size(value).with_context(|| format!("Invalid {}", key))?;
                }
                "cache.a1_ratio" => {
                    self.a1_ratio = parse_ratio(value).with_context(|| format!("Invalid {}", key))?;
                }
                _ => log::warn!("Ignoring unknown setting '{}'", key),
            }
        }
        Ok(self)
    }

    /// Check that the budgets make sense together
    pub fn validate(&self) -> Result<()> {
        if self.max_volatile_size == 0 {
            anyhow::bail!("Volatile cache size must be positive");
        }
        if !(self.a1_ratio > 0.0 && self.a1_ratio < 1.0) {
            anyhow::bail!("A1 ratio must be between 0 and 1 (exclusive)");
        }
        if self.max_single_persistent_size > self.max_persistent_size {
            anyhow::bail!(
                "Largest persistent entry ({}) exceeds the persistent budget ({})",
                self.max_single_persistent_size,
                self.max_persistent_size
            );
        }
        Ok(())
    }
}

/// Load cache settings, starting from the defaults. A missing path means
/// defaults only. The result is not validated yet, command line overrides
/// still apply on top of it.
pub fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => {
            let props = PropertyFile::load(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            CacheConfig::default().merge_properties(&props)
        }
        None => Ok(CacheConfig::default()),
    }
}

/// Parse a byte size with an optional `K`, `M` or `G` suffix (binary units)
pub fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((pos, c)) if c.is_ascii_alphabetic() => (&s[..pos], c.to_ascii_uppercase()),
        _ => (s, 'B'),
    };
    let multiplier = match unit {
        'B' => 1,
        'K' => KIB,
        'M' => MIB,
        'G' => GIB,
        other => anyhow::bail!("Unknown size suffix '{}'", other),
    };
    let value: usize = digits.trim().parse().context("Invalid size value")?;
    value
        .checked_mul(multiplier)
        .context("Size value out of range")
}

/// Parse the A1 ratio (0.0 to 1.0, exclusive)
pub fn parse_ratio(s: &str) -> Result<f64> {
    let ratio: f64 = s.trim().parse().context("Invalid ratio value")?;
    if !(ratio > 0.0 && ratio < 1.0) {
        anyhow::bail!("Ratio out of range (0.0 to 1.0, exclusive)");
    }
    Ok(ratio)
}
