//! Wildcard matching and directory enumeration for FOR, IF EXIST and `%~$PATH:`.

use glob::{MatchOptions, Pattern};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn has_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

/// Case-insensitive `*`/`?` match of a file name; `*.*` also matches names without a dot.
pub fn wildcard_matches(pattern: &str, name: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    let compiled = |p: &str| {
        let escaped: String = p
            .chars()
            .map(|c| match c {
                '*' | '?' => c.to_string(),
                _ => Pattern::escape(&c.to_string()),
            })
            .collect();
        Pattern::new(&escaped).ok()
    };
    if compiled(pattern).is_some_and(|p| p.matches_with(name, options)) {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(stem) if !name.contains('.') => compiled(stem).is_some_and(|p| p.matches_with(name, options)),
        _ => false,
    }
}

/// Splits `dir/pattern` into the directory prefix as written (with its trailing
/// separator) and the final component.
pub fn split_pattern(item: &str) -> (&str, &str) {
    let cut = item.rfind(['/', '\\']).map(|p| p + 1).unwrap_or(0);
    item.split_at(cut)
}

/// Names in `dir` matching `pattern`, sorted case-insensitively.
pub fn matching_names(dir: &Path, pattern: &str, files: bool, dirs: bool) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot enumerate directory");
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (is_dir && dirs) || (!is_dir && files)
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "." && name != "..")
        .filter(|name| wildcard_matches(pattern, name))
        .collect();
    names.sort_by_key(|name| name.to_lowercase());
    names
}

/// Pre-order directory walk: the subdirectories of each visited directory are
/// queued right after it, ahead of its remaining siblings.
#[derive(Debug)]
pub struct DirectoryStack {
    pending: VecDeque<PathBuf>,
}

impl DirectoryStack {
    pub fn new(root: PathBuf) -> Self {
        Self {
            pending: VecDeque::from([root]),
        }
    }
}

impl Iterator for DirectoryStack {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let current = self.pending.pop_front()?;
        for (offset, name) in matching_names(&current, "*", false, true)
            .into_iter()
            .enumerate()
        {
            let dir = current.join(name);
            // Symbolic links to directories are not followed.
            if fs::symlink_metadata(&dir).is_ok_and(|m| m.file_type().is_symlink()) {
                continue;
            }
            self.pending.insert(offset.min(self.pending.len()), dir);
        }
        Some(current)
    }
}
