//! Archive creation for scope exports.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};

/// Packs a set of files into an archive on disk.
///
/// Runs on the blocking pool; implementations may do synchronous I/O.
pub trait ArchiveBuilder: Send + Sync + 'static {
    /// Writes an archive at `output` holding `files`, given relative to
    /// `source_dir` and stored under those same relative names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] if a file cannot be added or the archive
    /// cannot be written.
    fn build(&self, output: &Path, source_dir: &Path, files: &[String]) -> Result<()>;
}

/// Gzip-compressed tarball builder.
#[derive(Debug, Clone, Copy)]
pub struct TarGzArchiver {
    level: Compression,
}

impl TarGzArchiver {
    /// Builder with an explicit gzip level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for TarGzArchiver {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ArchiveBuilder for TarGzArchiver {
    fn build(&self, output: &Path, source_dir: &Path, files: &[String]) -> Result<()> {
        let file = File::create(output).map_err(|e| {
            Error::Archive(format!("Failed to create {}: {e}", output.display()))
        })?;
        let mut archive = tar::Builder::new(GzEncoder::new(file, self.level));

        for name in files {
            archive
                .append_path_with_name(source_dir.join(name), name)
                .map_err(|e| Error::Archive(format!("Failed to add {name}: {e}")))?;
        }

        archive
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| Error::Archive(format!("Failed to finish archive: {e}")))?;
        Ok(())
    }
}
