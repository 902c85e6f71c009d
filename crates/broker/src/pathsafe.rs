// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validation for user-supplied file paths before they reach an agent.
//!
//! Checks run on the raw form first — any segment equal to the parent
//! marker is rejected before normalization — then again on the normalized
//! form against the denylist and, when given, the permitted base.

use std::path::{Component, Path, PathBuf};

use crate::error::BrokerError;

/// Reject raw paths that are empty, contain NUL, or carry a `..` segment.
pub fn check_raw(raw: &str) -> Result<(), BrokerError> {
    if raw.is_empty() {
        return Err(BrokerError::BadRequest("empty path".to_owned()));
    }
    if raw.contains('\0') {
        return Err(BrokerError::BadRequest("path contains NUL".to_owned()));
    }
    if raw.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(BrokerError::BadRequest("path traversal rejected".to_owned()));
    }
    Ok(())
}

/// Lexically normalize a path: fold `.` segments and collapse separators.
/// Parent markers were rejected up front, so no segment can escape.
pub fn normalize(raw: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether a normalized path matches or falls under a denylist entry.
pub fn is_denied(path: &Path, denylist: &[String]) -> bool {
    denylist.iter().any(|entry| {
        let denied = Path::new(entry);
        path == denied || path.starts_with(denied)
    })
}

/// Validate a user-supplied path with no base restriction.
pub fn validate(raw: &str, denylist: &[String]) -> Result<PathBuf, BrokerError> {
    check_raw(raw)?;
    let normalized = normalize(raw);
    if is_denied(&normalized, denylist) {
        return Err(BrokerError::Forbidden);
    }
    Ok(normalized)
}

/// Validate a user-supplied path that must stay inside `base`.
///
/// The base is resolved to an absolute form and the target re-checked
/// after normalization.
pub fn validate_within(base: &str, raw: &str, denylist: &[String]) -> Result<PathBuf, BrokerError> {
    check_raw(base)?;
    check_raw(raw)?;

    let base = normalize(base);
    if !base.is_absolute() {
        return Err(BrokerError::BadRequest("base directory must be absolute".to_owned()));
    }

    let target = if Path::new(raw).is_absolute() {
        normalize(raw)
    } else {
        normalize(&format!("{}/{}", base.display(), raw))
    };

    if !target.starts_with(&base) {
        return Err(BrokerError::Forbidden);
    }
    if is_denied(&target, denylist) {
        return Err(BrokerError::Forbidden);
    }
    Ok(target)
}

#[cfg(test)]
#[path = "pathsafe_tests.rs"]
mod tests;
