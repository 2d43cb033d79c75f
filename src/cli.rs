use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{parse_ratio, parse_size, CacheConfig};
use crate::logging::LogLevel;
use crate::resource::{CachingResourcesManager, MemorySource, PackFile, ResourceKey, ResourceKind};

/// Resource pack tool with a two-queue resource cache
#[derive(Parser, Debug)]
#[command(name = "assetcache")]
#[command(version)]
#[command(about = "Build, inspect and replay resource packs through the resource cache", long_about = None)]
pub struct Cli {
    /// Settings file with cache.* keys
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Volatile cache budget (e.g. 64M)
    #[arg(long, value_name = "SIZE", global = true)]
    pub volatile_size: Option<String>,

    /// Persistent cache budget (e.g. 8M)
    #[arg(long, value_name = "SIZE", global = true)]
    pub persistent_size: Option<String>,

    /// Share of the volatile budget given to once-touched entries
    #[arg(long, value_name = "RATIO", global = true)]
    pub a1_ratio: Option<String>,

    /// Log verbosity
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write files into <base>.pak and <base>.idx, aliased by file stem
    Pack {
        /// Output base path
        #[arg(short, long, value_name = "BASE")]
        output: PathBuf,

        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// List the resources of a pack index
    Inspect {
        #[arg(value_name = "INDEX")]
        index: PathBuf,
    },

    /// Fetch resources through the cache in order and report statistics
    Replay {
        #[arg(value_name = "INDEX")]
        index: PathBuf,

        /// Aliases, or ids written as #N
        #[arg(value_name = "KEY")]
        keys: Vec<String>,

        /// Keys to request as persistent
        #[arg(long, value_name = "KEY")]
        persistent: Vec<String>,
    },
}

impl Cli {
    /// Merge command line overrides into the cache config
    pub fn merge_into_config(&self, mut config: CacheConfig) -> Result<CacheConfig> {
        if let Some(ref size) = self.volatile_size {
            config.max_volatile_size = parse_size(size).context("Invalid volatile size")?;
        }
        if let Some(ref size) = self.persistent_size {
            config.max_persistent_size = parse_size(size).context("Invalid persistent size")?;
            // Keep the single-entry limit inside a shrunken budget
            config.max_single_persistent_size = config
                .max_single_persistent_size
                .min(config.max_persistent_size);
        }
        if let Some(ref ratio) = self.a1_ratio {
            config.a1_ratio = parse_ratio(ratio).context("Invalid A1 ratio")?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the selected command, writing its report to `out`
    pub fn run(&self, config: &CacheConfig, out: &mut dyn Write) -> Result<()> {
        match &self.command {
            Command::Pack { output, files } => run_pack(output, files, out),
            Command::Inspect { index } => run_inspect(index, config, out),
            Command::Replay {
                index,
                keys,
                persistent,
            } => run_replay(index, keys, persistent, config, out),
        }
    }
}

/// Resource kind implied by a file extension
pub fn kind_for_path(path: &Path) -> ResourceKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png" | "jpg" | "jpeg" | "bmp" | "gif" | "qoi") => ResourceKind::Texture,
        Some("wav" | "ogg") => ResourceKind::Sound,
        _ => ResourceKind::Binary,
    }
}

/// `#N` names an id, anything else is an alias
pub fn parse_key(s: &str) -> ResourceKey {
    match s.strip_prefix('#').and_then(|n| n.parse().ok()) {
        Some(id) => ResourceKey::Id(id),
        None => ResourceKey::Alias(s.to_string()),
    }
}

fn run_pack(output: &Path, files: &[PathBuf], out: &mut dyn Write) -> Result<()> {
    let mut pack = MemorySource::new();
    for file in files {
        let alias = file
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("Cannot derive an alias from {}", file.display()))?;
        let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let kind = kind_for_path(file);
        let size = data.len();
        let id = pack.add(Some(alias), kind.clone(), data);
        writeln!(out, "{:>5}  {:<8} {:>10}  {}", id, kind, size, alias)?;
    }
    let index_path = pack.write_pack(output)?;
    writeln!(out, "Wrote {} resources to {}", pack.index().len(), index_path.display())?;
    Ok(())
}

fn run_inspect(index: &Path, config: &CacheConfig, out: &mut dyn Write) -> Result<()> {
    let pack = Arc::new(PackFile::open(index).with_context(|| format!("Failed to open pack {}", index.display()))?);
    let cache = CachingResourcesManager::new(pack.clone(), config);

    writeln!(out, "{:>5}  {:<8} {:>10} {:>10}  ALIAS", "ID", "KIND", "OFFSET", "SIZE")?;
    let mut bypassed = 0;
    for def in pack.index().iter() {
        let bypass = cache.should_bypass(def.size);
        if bypass {
            bypassed += 1;
        }
        writeln!(
            out,
            "{:>5}  {:<8} {:>10} {:>10}  {}{}",
            def.id,
            def.kind,
            def.offset,
            def.size,
            def.alias.as_deref().unwrap_or("-"),
            if bypass { "  (uncached)" } else { "" }
        )?;
    }
    writeln!(
        out,
        "{} resources, {} too large to cache with a {} byte budget",
        pack.index().len(),
        bypassed,
        cache.max_cache_buffer_size()
    )?;
    Ok(())
}

fn run_replay(
    index: &Path,
    keys: &[String],
    persistent: &[String],
    config: &CacheConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let pack = PackFile::open(index).with_context(|| format!("Failed to open pack {}", index.display()))?;
    let cache = CachingResourcesManager::new(Arc::new(pack), config);

    for raw in keys {
        let key = parse_key(raw);
        let as_persistent = persistent.contains(raw);
        match cache.get_resource(key.clone(), as_persistent) {
            Ok(handle) => {
                let location = cache.location(handle.id());
                writeln!(out, "{} -> {:?} ({} bytes)", key, location, handle.len())?;
            }
            Err(e) if e.is_capacity_error() => {
                let pinned = cache.get_uncached_buffer(key.clone())?;
                writeln!(out, "{} -> uncached ({} bytes): {}", key, pinned.len(), e)?;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to fetch {}", key)),
        }
    }

    let stats = cache.stats();
    writeln!(out, "hits:        {}", stats.hits)?;
    writeln!(out, "misses:      {}", stats.misses)?;
    writeln!(out, "hit rate:    {:.1}%", stats.hit_rate() * 100.0)?;
    writeln!(out, "promotions:  {}", stats.promotions)?;
    writeln!(out, "evictions:   {}", stats.evictions)?;
    writeln!(
        out,
        "volatile:    {}/{} bytes in {} entries",
        stats.volatile_size,
        stats.max_volatile_size,
        stats.a1_entries + stats.a_main_entries
    )?;
    writeln!(
        out,
        "persistent:  {}/{} bytes in {} entries",
        stats.persistent_size, stats.max_persistent_size, stats.persistent_entries
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn run(cli: &Cli) -> String {
        let config = cli.merge_into_config(CacheConfig::default()).unwrap();
        let mut out = Vec::new();
        cli.run(&config, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[rstest]
    #[case("title.PNG", ResourceKind::Texture)]
    #[case("music/theme.ogg", ResourceKind::Sound)]
    #[case("click.wav", ResourceKind::Sound)]
    #[case("script.txt", ResourceKind::Binary)]
    #[case("noext", ResourceKind::Binary)]
    fn test_kind_for_path(#[case] path: &str, #[case] kind: ResourceKind) {
        assert_eq!(kind_for_path(Path::new(path)), kind);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("#12"), ResourceKey::Id(12));
        assert_eq!(parse_key("12"), ResourceKey::Alias("12".to_string()));
        assert_eq!(parse_key("#x"), ResourceKey::Alias("#x".to_string()));
    }

    #[test]
    fn test_merge_overrides() {
        let cli = parse(&[
            "assetcache",
            "--volatile-size",
            "1M",
            "--persistent-size",
            "64K",
            "--a1-ratio",
            "0.5",
            "inspect",
            "x.idx",
        ]);
        let config = cli.merge_into_config(CacheConfig::default()).unwrap();
        assert_eq!(config.max_volatile_size, 1024 * 1024);
        assert_eq!(config.max_persistent_size, 64 * 1024);
        assert_eq!(config.max_single_persistent_size, 64 * 1024);
        assert_eq!(config.a1_ratio, 0.5);
    }

    #[test]
    fn test_merge_rejects_bad_ratio() {
        let cli = parse(&["assetcache", "--a1-ratio", "2", "inspect", "x.idx"]);
        assert!(cli.merge_into_config(CacheConfig::default()).is_err());
    }

    #[test]
    fn test_log_level_flag() {
        let cli = parse(&["assetcache", "inspect", "x.idx", "--log-level", "debug"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_pack_inspect_replay() {
        let dir = TempDir::new().unwrap();
        let intro = dir.path().join("intro.txt");
        let theme = dir.path().join("theme.wav");
        fs::write(&intro, vec![b'a'; 100]).unwrap();
        fs::write(&theme, vec![0u8; 400]).unwrap();
        let base = dir.path().join("game");
        let base_arg = base.to_str().unwrap();

        let output = run(&parse(&[
            "assetcache",
            "pack",
            "-o",
            base_arg,
            intro.to_str().unwrap(),
            theme.to_str().unwrap(),
        ]));
        assert!(output.contains("Wrote 2 resources"));

        let index = base.with_extension("idx");
        let index_arg = index.to_str().unwrap();
        let output = run(&parse(&["assetcache", "--volatile-size", "1K", "inspect", index_arg]));
        assert!(output.contains("intro"));
        assert!(output.contains("SOUND"));
        assert!(output.contains("1 too large to cache"));

        let output = run(&parse(&[
            "assetcache",
            "--volatile-size",
            "1K",
            "replay",
            index_arg,
            "intro",
            "#1",
            "intro",
            "--persistent",
            "#1",
        ]));
        assert!(output.contains("'intro' -> Some(A1)"));
        assert!(output.contains("#1 -> Some(Persistent)"));
        assert!(output.contains("'intro' -> Some(AMain)"));
        assert!(output.contains("hits:        1"));
        assert!(output.contains("misses:      2"));
    }

    #[test]
    fn test_replay_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        let mut pack = MemorySource::new();
        pack.add(Some("one"), ResourceKind::Binary, vec![1]);
        let index = pack.write_pack(dir.path().join("p")).unwrap();

        let cli = parse(&["assetcache", "replay", index.to_str().unwrap(), "two"]);
        let mut out = Vec::new();
        let err = cli.run(&CacheConfig::default(), &mut out).unwrap_err();
        assert!(err.to_string().contains("'two'"));
    }
}
