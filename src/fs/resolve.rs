//! Mapping DOS paths onto the host tree.
//!
//! DOS clients send upper-case, 8.3-truncated, backslash-separated paths.
//! The host tree is case-sensitive and may hold long names, so every
//! component is located by scanning its parent directory and comparing FCB
//! forms. The first host entry whose FCB form matches wins.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::fcb::FcbName;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A component did not match anything. `partial` is the resolved prefix
    /// with the unmatched component appended verbatim; `last` tells whether
    /// that component was the final one.
    #[error("no match for a component of {}", partial.display())]
    NotFound { partial: PathBuf, last: bool },

    #[error("invalid path component {0:?}")]
    Invalid(String),
}

impl ResolveError {
    /// Host path a caller may create, when only the final component was missing.
    pub fn creatable(&self) -> Option<&Path> {
        match self {
            ResolveError::NotFound { partial, last: true } => Some(partial),
            _ => None,
        }
    }
}

/// Lower-case ASCII and turn backslashes into slashes.
pub fn normalize(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .map(|&c| match c {
            b'\\' => b'/',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Split a search path such as `X:\DIR\FILE????.???` into a normalised
/// directory (with trailing slash) and file mask.
pub fn split_search(raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let raw = match raw {
        [_, b':', rest @ ..] => rest,
        _ => raw,
    };
    let cut = raw
        .iter()
        .rposition(|&c| c == b'\\' || c == b'/')
        .map(|i| i + 1)
        .unwrap_or(0);
    (normalize(&raw[..cut]), normalize(&raw[cut..]))
}

/// True if `path`, once `root` is stripped off and leading slashes are
/// skipped, contains no further slash.
pub fn is_root(root: &[u8], path: &[u8]) -> bool {
    let rest = path.get(root.len()..).unwrap_or(&[]);
    let skip = rest.iter().take_while(|&&c| c == b'/').count();
    !rest[skip..].contains(&b'/')
}

/// Same as [`is_root`] for a resolved host directory.
pub fn is_root_dir(root: &Path, dir: &Path) -> bool {
    let mut dir = dir.as_os_str().as_bytes().to_vec();
    dir.push(b'/');
    is_root(root.as_os_str().as_bytes(), &dir)
}

/// Resolve a normalised DOS path (relative to `root`) to the real host path.
pub fn resolve(root: &Path, dos_path: &[u8]) -> Result<PathBuf, ResolveError> {
    let parts: Vec<&[u8]> = dos_path
        .split(|&c| c == b'/')
        .filter(|c| !c.is_empty())
        .collect();

    let mut current = root.to_path_buf();
    for (idx, part) in parts.iter().enumerate() {
        if *part == b"." || *part == b".." || part.contains(&0) {
            return Err(ResolveError::Invalid(String::from_utf8_lossy(part).into_owned()));
        }
        let more = idx + 1 < parts.len();
        match find_entry(&current, FcbName::encode(part), more) {
            Some(name) => current.push(name),
            None => {
                current.push(OsStr::from_bytes(part));
                return Err(ResolveError::NotFound {
                    partial: current,
                    last: !more,
                });
            }
        }
    }
    Ok(current)
}

/// Scan `dir` for the first entry whose FCB form is `want`. Intermediate
/// components must be directories.
fn find_entry(dir: &Path, want: FcbName, need_dir: bool) -> Option<std::ffi::OsString> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if FcbName::encode(name.as_bytes()) != want {
            continue;
        }
        if need_dir && !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        return Some(name);
    }
    None
}
