//! Destination layout: remote category structure mirrored under the local
//! root, with path components sanitized for the filesystem.

use std::path::{Path, PathBuf};

/// Maps a name to a safe path component.
///
/// Separators, control characters, and shell-hostile punctuation collapse
/// to single underscores; leading/trailing underscores and dots are
/// trimmed so components cannot escape upward or hide themselves.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

/// Builds the destination path for a file: the sanitized category chain
/// (root → leaf) under the download root, ending in the sanitized name.
///
/// Empty or fully-sanitized-away components are skipped; an unusable name
/// falls back to `download`.
#[must_use]
pub fn dest_path(root: &Path, category_chain: &[String], name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in category_chain {
        let cleaned = sanitize_component(component);
        if !cleaned.is_empty() {
            path.push(cleaned);
        }
    }

    let filename = sanitize_component(name);
    if filename.is_empty() {
        path.push("download");
    } else {
        path.push(filename);
    }
    path
}

/// The temporary sibling a transfer streams into before the rename commit.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    dest.with_file_name(name)
}
