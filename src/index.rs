//! Streams a tree of registry index files and yields [`FetchDescriptor`]s.
//!
//! Each surviving file is line-delimited JSON, one version record per
//! line. Directories named `.git`/`.github`, and files named
//! `config.json`/`README.md` (case-insensitive) or ending in `.keep`, are
//! skipped entirely, matching the layout of a crates.io-index checkout.

use crate::{checksum::ChecksumIndex, FetchDescriptor};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

#[derive(Deserialize)]
struct IndexEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    vers: String,
    #[serde(default)]
    cksum: String,
    #[serde(default)]
    yanked: bool,
}

pub struct ScanOptions<'a> {
    pub base_url: &'a str,
    pub include_yanked: bool,
    pub limit: Option<usize>,
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some(".git") | Some(".github")
        )
}

fn is_excluded_file(entry: &DirEntry) -> bool {
    if !entry.file_type().is_file() {
        return false;
    }

    let name = match entry.file_name().to_str() {
        Some(n) => n,
        None => return true,
    };

    name.eq_ignore_ascii_case("config.json")
        || name.eq_ignore_ascii_case("readme.md")
        || name.eq_ignore_ascii_case(".gitignore")
        || name.ends_with(".keep")
}

/// Walks `index_dir`, parsing every non-excluded file as line-delimited
/// JSON and emitting a descriptor for each surviving entry. Stops reading
/// further files as soon as `opts.limit` descriptors have been produced.
pub fn scan(index_dir: &Path, opts: &ScanOptions<'_>) -> Vec<FetchDescriptor> {
    let base_url = opts.base_url.trim_end_matches('/');
    let mut out = Vec::new();

    let walker = WalkDir::new(index_dir).into_iter().filter_entry(|e| {
        // WalkDir's filter_entry prunes descent into excluded directories,
        // satisfying "do not enumerate the full tree if a small limit is set"
        // together with the early-return below.
        e.path() == index_dir || !is_excluded_dir(e)
    });

    'walk: for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if !entry.file_type().is_file() || is_excluded_file(&entry) {
            continue;
        }

        let contents = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "failed to read index file");
                continue;
            }
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let entry: IndexEntry = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(_) => continue,
            };

            if entry.name.is_empty() || entry.vers.is_empty() {
                continue;
            }
            if entry.yanked && !opts.include_yanked {
                continue;
            }

            let url = format!("{base_url}/{}/{}-{}.crate", entry.name, entry.name, entry.vers);
            let expected_sha256 = if entry.cksum.is_empty() {
                None
            } else {
                Some(entry.cksum.to_lowercase())
            };

            out.push(FetchDescriptor {
                url,
                name: entry.name,
                version: entry.vers,
                expected_sha256,
            });

            if let Some(limit) = opts.limit {
                if out.len() >= limit {
                    break 'walk;
                }
            }
        }
    }

    out
}

/// Applies an external checksum index on top of descriptors whose index
/// entry didn't carry a `cksum`, or overrides it, since external entries
/// win on conflict (matching [`ChecksumIndex::load_external`]'s policy).
pub fn apply_checksums(descriptors: &mut [FetchDescriptor], checksums: &ChecksumIndex) {
    for d in descriptors {
        if let Some(sha) = checksums.get(&d.url) {
            d.expected_sha256 = Some(sha.to_owned());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn parses_surviving_entries_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "se/rd/serde",
            "{\"name\":\"serde\",\"vers\":\"1.0.0\",\"cksum\":\"AB\",\"yanked\":false}\n\
             # comment\n\
             not json\n\
             {\"name\":\"\",\"vers\":\"1.0.0\",\"cksum\":\"\",\"yanked\":false}\n\
             {\"name\":\"serde\",\"vers\":\"1.0.1\",\"cksum\":\"\",\"yanked\":true}\n",
        );
        write(dir.path(), "config.json", "{}");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/master");
        write(dir.path(), "README.md", "hello");

        let descriptors = scan(
            dir.path(),
            &ScanOptions {
                base_url: "https://static.example.test/crates/",
                include_yanked: false,
                limit: None,
            },
        );

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "serde");
        assert_eq!(descriptors[0].expected_sha256.as_deref(), Some("ab"));
        assert_eq!(
            descriptors[0].url,
            "https://static.example.test/crates/serde/serde-1.0.0.crate"
        );
    }

    #[test]
    fn include_yanked_flag() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "se/rd/serde",
            "{\"name\":\"serde\",\"vers\":\"1.0.1\",\"cksum\":\"\",\"yanked\":true}\n",
        );

        let opts = ScanOptions {
            base_url: "https://example.test",
            include_yanked: true,
            limit: None,
        };
        let descriptors = scan(dir.path(), &opts);
        assert_eq!(descriptors.len(), 1);
    }

    #[test]
    fn limit_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::new();
        for i in 0..10 {
            body.push_str(&format!(
                "{{\"name\":\"krate{i}\",\"vers\":\"1.0.0\",\"cksum\":\"\",\"yanked\":false}}\n"
            ));
        }
        write(dir.path(), "krate", &body);

        let descriptors = scan(
            dir.path(),
            &ScanOptions {
                base_url: "https://example.test",
                include_yanked: false,
                limit: Some(3),
            },
        );
        assert_eq!(descriptors.len(), 3);
    }
}
