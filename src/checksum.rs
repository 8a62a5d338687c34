//! The Checksum Index: an immutable-during-a-run mapping from URL to the
//! expected lowercase hex SHA-256 for that URL, populated from the
//! registry index and optionally unioned with an external JSON Lines file.

use anyhow::{Context, Error};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct ChecksumIndex {
    by_url: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ExternalEntry {
    url: String,
    sha256: String,
}

impl ChecksumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, sha256: impl Into<String>) {
        self.by_url.insert(url.into(), sha256.into().to_lowercase());
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.by_url.get(url).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Loads an external `{ "url": ..., "sha256": ... }` JSON Lines file,
    /// unioning it onto checksums already derived from the registry index.
    /// External entries win on conflict. Order of lines in the file does
    /// not affect the resulting map.
    pub fn load_external(&mut self, path: &Path) -> Result<usize, Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read checksum file {}", path.display()))?;

        let mut loaded = 0;
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let entry: ExternalEntry = serde_json::from_str(line)
                .with_context(|| format!("malformed checksum entry at line {}", lineno + 1))?;
            self.insert(entry.url, entry.sha256);
            loaded += 1;
        }

        Ok(loaded)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn external_wins_on_conflict() {
        let mut idx = ChecksumIndex::new();
        idx.insert("https://example.test/a.crate", "AAAA");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"url":"https://example.test/a.crate","sha256":"BBBB"}}"#
        )
        .unwrap();

        idx.load_external(file.path()).unwrap();
        assert_eq!(idx.get("https://example.test/a.crate"), Some("bbbb"));
    }

    #[test]
    fn permutation_independent() {
        let lines = [
            r#"{"url":"https://example.test/a.crate","sha256":"AAAA"}"#,
            r#"{"url":"https://example.test/b.crate","sha256":"BBBB"}"#,
        ];

        for perm in [lines, [lines[1], lines[0]]] {
            let mut idx = ChecksumIndex::new();
            let mut file = tempfile::NamedTempFile::new().unwrap();
            for line in perm {
                writeln!(file, "{line}").unwrap();
            }
            idx.load_external(file.path()).unwrap();
            assert_eq!(idx.get("https://example.test/a.crate"), Some("aaaa"));
            assert_eq!(idx.get("https://example.test/b.crate"), Some("bbbb"));
        }
    }

    #[test]
    fn skips_blank_lines() {
        let mut idx = ChecksumIndex::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"url":"https://example.test/a.crate","sha256":"AAAA"}}"#).unwrap();
        writeln!(file).unwrap();
        idx.load_external(file.path()).unwrap();
        assert_eq!(idx.len(), 1);
    }
}
