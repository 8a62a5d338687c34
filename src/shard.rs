//! Derives the on-disk directory for an artifact from its logical name,
//! mirroring the two-level sharding crates.io itself uses so that no
//! single directory ends up with tens of thousands of entries.
//!
//! Grounded on the prefixing rule in cargo's own registry index layout
//! (`get_crate_prefix` upstream), generalized to the crates.io sharding
//! rule this engine actually needs.

use std::path::{Path, PathBuf};

/// Splits `name` into the two shard components used to build the output
/// path, following spec's shard rule exactly:
///
/// - `len <= 3`: no sharding, single component.
/// - starts with `1`/`2`/`3`: first shard is that single digit.
/// - second character is `-`: first shard is the first two characters.
/// - otherwise: first shard is the first character.
///
/// The second shard is always the (up to) two characters following the
/// first shard, clamped to the end of the name.
pub fn shard_components(name: &str) -> Vec<String> {
    if name.chars().count() <= 3 {
        return vec![name.to_owned()];
    }

    let chars: Vec<char> = name.chars().collect();

    let first_len = if matches!(chars[0], '1' | '2' | '3') {
        1
    } else if chars[1] == '-' {
        2
    } else {
        1
    };

    let first: String = chars[..first_len].iter().collect();
    let second_end = (first_len + 2).min(chars.len());
    let second: String = chars[first_len..second_end].iter().collect();

    vec![first, second]
}

/// Full on-disk path for a crate artifact: `<out_dir>/<shards...>/<name>-<version>.crate`.
pub fn shard_path(out_dir: &Path, name: &str, version: &str) -> PathBuf {
    let mut path = out_dir.to_path_buf();
    for component in shard_components(name) {
        path.push(component);
    }
    path.push(filename(name, version));
    path
}

pub fn filename(name: &str, version: &str) -> String {
    format!("{name}-{version}.crate")
}
