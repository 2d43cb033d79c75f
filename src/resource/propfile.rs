// Property File Parser
// Parses the engine's `key = value` files (pack indexes and cache settings)

use std::fs;
use std::io;
use std::path::Path;

/// Parse property-file text, invoking `handler` with `(line, key, value)`
/// for each entry in file order.
///
/// Blank lines and `#` comments (whole-line or trailing) are skipped. Keys
/// and values are trimmed; key case is preserved. Lines without `=` or with
/// an empty key are reported with a warning and skipped.
pub fn parse_propfile(data: &str, handler: &mut dyn FnMut(usize, &str, &str)) {
    for (line_no, raw) in data.lines().enumerate() {
        let line_no = line_no + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            log::warn!("Key without value at line {}: '{}'", line_no, line);
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            log::warn!("Value without key at line {}", line_no);
            continue;
        }

        handler(line_no, key, value.trim());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("Property file not found: {0}")]
    FileNotFound(String),
    #[error("I/O error reading property file: {0}")]
    Io(#[from] io::Error),
}

/// Ordered property file contents.
///
/// Lookups are case-insensitive; iteration preserves file order and the
/// original key spelling. A repeated key keeps both entries, and `get`
/// returns the last one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyFile {
    entries: Vec<(String, String)>,
}

impl PropertyFile {
    /// Parse property-file text
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        parse_propfile(content, &mut |_, key, value| {
            entries.push((key.to_string(), value.to_string()));
        });
        PropertyFile { entries }
    }

    /// Load a property file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PropertyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PropertyError::FileNotFound(path.display().to_string()),
            _ => PropertyError::Io(e),
        })?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let pf = PropertyFile::parse("KEY=VALUE");
        assert_eq!(pf.get("KEY"), Some("VALUE"));
        assert_eq!(pf.len(), 1);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let pf = PropertyFile::parse("  key  =  some value  ");
        assert_eq!(pf.get("key"), Some("some value"));
    }

    #[test]
    fn test_parse_comments_and_blank_lines() {
        let content = r#"
# leading comment
a = 1

b = 2   # trailing comment
   # indented comment
"#;
        let pf = PropertyFile::parse(content);
        assert_eq!(pf.len(), 2);
        assert_eq!(pf.get("a"), Some("1"));
        assert_eq!(pf.get("b"), Some("2"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let pf = PropertyFile::parse("bare_keyword\n= no key\ngood = yes");
        assert_eq!(pf.len(), 1);
        assert_eq!(pf.get("good"), Some("yes"));
    }

    #[test]
    fn test_parse_preserves_order_and_case() {
        let pf = PropertyFile::parse("Zeta = 1\nalpha = 2\nMid = 3");
        let keys: Vec<&str> = pf.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Zeta", "alpha", "Mid"]);
    }

    #[test]
    fn test_lookup_is_case_insensitive_last_wins() {
        let pf = PropertyFile::parse("cache.a1_ratio = 0.25\nCACHE.A1_RATIO = 0.5");
        assert_eq!(pf.get("cache.a1_ratio"), Some("0.5"));
        assert!(pf.contains("Cache.A1_Ratio"));
        assert_eq!(pf.len(), 2);
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let mut seen = Vec::new();
        parse_propfile("# c\n\nx = 1\ny = 2\n", &mut |line, k, v| {
            seen.push((line, k.to_string(), v.to_string()));
        });
        assert_eq!(
            seen,
            vec![(3, "x".to_string(), "1".to_string()), (4, "y".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_value_may_contain_equals() {
        let pf = PropertyFile::parse("expr = a=b");
        assert_eq!(pf.get("expr"), Some("a=b"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PropertyFile::load(dir.path().join("missing.cfg"));
        assert!(matches!(result, Err(PropertyError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.cfg");
        fs::write(&path, "cache.volatile_size = 64M\n").unwrap();
        let pf = PropertyFile::load(&path).unwrap();
        assert_eq!(pf.get("cache.volatile_size"), Some("64M"));
    }
}
