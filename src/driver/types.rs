//! Types shared by the storage drivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A change recorded by a revision-tracking driver.
///
/// `path` is the full normalized path, so every revision belongs to exactly
/// one scope base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRevision {
    pub path: String,
    /// Unique revision identifier (UUID v4).
    pub revision: String,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

/// Filters applied by [`StorageDriver::directory_listing`](super::StorageDriver::directory_listing).
#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    /// Glob patterns matched against the relative path; matches are dropped.
    pub excludes: Vec<String>,
    /// Keep files with a path segment starting with `.`.
    pub include_dot_files: bool,
}

impl ListingOptions {
    pub fn new(excludes: &[String], include_dot_files: bool) -> Self {
        Self {
            excludes: excludes.to_vec(),
            include_dot_files,
        }
    }
}
