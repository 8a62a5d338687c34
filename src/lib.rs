#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! Core of the crate-mirror mass-download engine.
//!
//! Cloning or updating the upstream index repository, the sidecar JSON
//! emitter and the signing tool are separate subsystems not implemented
//! here; they reuse [`shard::shard_path`] but nothing else in this crate.

pub mod bundle;
pub mod checksum;
pub mod config;
pub mod fetch;
pub mod index;
pub mod manifest;
pub mod metrics;
pub mod orchestrator;
pub mod shard;
pub mod util;
pub mod verify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One object the engine needs to retrieve and place on disk.
///
/// Built by the [`index`] scanner, consumed exactly once by a fetch worker,
/// destroyed after the worker emits a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDescriptor {
    /// Source URL, e.g. `https://static.crates.io/crates/serde/serde-1.0.147.crate`.
    pub url: String,
    /// The crate name, used for sharding.
    pub name: String,
    /// The crate version, used to build the output filename.
    pub version: String,
    /// Lowercase hex SHA-256, when known from the index or an external
    /// checksum file.
    pub expected_sha256: Option<String>,
}

impl FetchDescriptor {
    pub fn filename(&self) -> String {
        format!("{}-{}.crate", self.name, self.version)
    }
}

/// Terminal outcome of one attempted fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Skipped,
}

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One line of the append-only manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub schema_version: u32,
    pub url: String,
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries: u32,
}

impl Record {
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}
