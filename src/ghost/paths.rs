//! Path normalization for scoped file access.
//!
//! Normalized paths use forward slashes, never start with `./`, and (when
//! sanitization is on) contain no empty, `.` or `..` segments.

use crate::error::{Error, Result};
use crate::utils::forward_slashes;

/// Characters stripped from every path segment.
const UNSAFE_CHARS: &[char] = &['/', '?', '<', '>', '\\', ':', '*', '|', '"'];

/// Removes unsafe and control characters from one path segment.
pub(crate) fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| !UNSAFE_CHARS.contains(c) && !c.is_control())
        .collect()
}

/// Joins caller-supplied parts into a base-relative path.
///
/// Each part may itself contain separators. Without sanitization, segments
/// are kept verbatim apart from empty and `.` segments.
pub(crate) fn relative_path(parts: &[&str], sanitize: bool) -> String {
    let mut segments = Vec::new();
    for part in parts {
        for raw in part.split(['/', '\\']) {
            let segment = if sanitize {
                sanitize_segment(raw)
            } else {
                raw.to_string()
            };
            if segment.is_empty() || segment == "." || (sanitize && segment == "..") {
                continue;
            }
            segments.push(segment);
        }
    }
    segments.join("/")
}

/// Appends a relative path to a base directory.
pub(crate) fn join(base: &str, relative: &str) -> String {
    match (base.is_empty(), relative.is_empty()) {
        (_, true) => base.to_string(),
        (true, false) => relative.to_string(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Canonical form of a scope base directory.
///
/// # Errors
///
/// Returns [`Error::InvalidScopeIdentifier`] if `*` appears anywhere but as
/// the last character.
pub(crate) fn normalize_base(base: &str) -> Result<String> {
    let mut base = forward_slashes(base);
    while let Some(rest) = base.strip_prefix("./") {
        base = rest.to_string();
    }
    if base == "." {
        base.clear();
    }
    if base.len() > 1 {
        base = base.trim_end_matches('/').to_string();
    }

    if let Some(pos) = base.find('*')
        && pos != base.len() - 1
    {
        return Err(Error::invalid_scope(format!(
            "wildcard allowed only as the last character of a base directory: '{base}'"
        )));
    }

    Ok(base)
}

/// Directory listed by a directory-glob scope.
pub(crate) fn glob_listing_base(base: &str) -> &str {
    base.trim_end_matches('*').trim_end_matches('/')
}
