//! Canonical path form used for identity and containment checks.
//!
//! Every path that touches the database, the playlist store, or a security
//! check goes through [`normalize`] first. Raw paths are never compared.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Trim surrounding whitespace and a single layer of shell-escaping quotes,
/// then lexically clean the path (collapse `//`, resolve `.` and `..` without
/// touching the filesystem). Returns `None` for an empty result.
pub fn clean(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        return None;
    }
    Some(lexical_clean(Path::new(trimmed)).to_string_lossy().into_owned())
}

/// Purely lexical cleanup: no symlink resolution, no I/O.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                out.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !has_root(&out) {
                    // A leading ".." in a relative path cannot be resolved away.
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn has_root(path: &Path) -> bool {
    path.components()
        .next()
        .is_some_and(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
}

/// Canonical form: cleaned, and lowercased on case-insensitive hosts so that
/// `/Photos` and `/photos` resolve to the same row.
pub fn normalize(path: &str) -> String {
    let cleaned = clean(path).unwrap_or_default();
    if cfg!(windows) {
        cleaned.to_lowercase()
    } else {
        cleaned
    }
}

/// True iff `path` equals `root` or lives strictly below it. The separator
/// suffix on the prefix check rejects sibling folders that merely share a
/// textual prefix (`/photos2` is not within `/photos`).
pub fn within_root(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);
    if path == root {
        return true;
    }
    let mut prefix = root;
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    path.starts_with(&prefix)
}

/// Find the registered root containing `path`, returning the stored root form.
pub fn matching_root<'a, S: AsRef<str>>(path: &str, roots: &'a [S]) -> Option<&'a str> {
    roots
        .iter()
        .map(|r| r.as_ref())
        .find(|root| within_root(path, root))
}
