//! Listing filters shared by both drivers.

use glob::{MatchOptions, Pattern};

use super::types::ListingOptions;
use crate::error::{Error, Result};

fn is_dot_path(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

/// Applies dot-file and exclude filters, then sorts.
pub(crate) fn filter_listing(paths: Vec<String>, options: &ListingOptions) -> Result<Vec<String>> {
    let excludes = options
        .excludes
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::driver(format!("Invalid exclude pattern '{p}'"), e))
        })
        .collect::<Result<Vec<_>>>()?;

    let match_options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut kept: Vec<String> = paths
        .into_iter()
        .filter(|path| options.include_dot_files || !is_dot_path(path))
        .filter(|path| {
            !excludes
                .iter()
                .any(|pattern| pattern.matches_with(path, match_options))
        })
        .collect();

    kept.sort();
    Ok(kept)
}
