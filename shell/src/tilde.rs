//! `%~` modifiers for batch parameters and FOR variables.
//!
//! `%~fdpnxsatz$VAR:X` selects parts of the path named by the variable `X`.
//! With no flags the value is only stripped of its surrounding quotes.

use crate::env::resolve_path;
use crate::expansion::ExpansionScope;
use crate::params;
use chrono::{DateTime, Local};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TildeFlags {
    pub full: bool,
    pub drive: bool,
    pub path: bool,
    pub name: bool,
    pub extension: bool,
    pub short: bool,
    pub attributes: bool,
    pub time: bool,
    pub size: bool,
}

impl TildeFlags {
    fn set(&mut self, c: char) -> bool {
        match c.to_ascii_lowercase() {
            'f' => self.full = true,
            'd' => self.drive = true,
            'p' => self.path = true,
            'n' => self.name = true,
            'x' => self.extension = true,
            's' => self.short = true,
            'a' => self.attributes = true,
            't' => self.time = true,
            'z' => self.size = true,
            _ => return false,
        }
        true
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn any_path_part(&self) -> bool {
        self.full || self.short || self.drive || self.path || self.name || self.extension
    }
}

/// A parsed `%~...X` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TildeSpec {
    pub flags: TildeFlags,
    /// `$VAR:` search list.
    pub search: Option<String>,
    pub variable: char,
    /// Index just past the variable character.
    pub end: usize,
}

/// Parses the modifiers starting at `chars[tilde]` (which must be `~`).
///
/// If the character after the modifiers is not a variable, the last modifier letter
/// is taken as the variable instead, so `%~f` can name FOR variable `f`.
pub fn parse(chars: &[char], tilde: usize, is_variable: impl Fn(char) -> bool) -> Option<TildeSpec> {
    if chars.get(tilde) != Some(&'~') {
        return None;
    }
    let mut pos = tilde + 1;
    let mut modifiers: Vec<usize> = Vec::new();
    let mut search = None;
    loop {
        match chars.get(pos) {
            Some('$') => {
                let colon = chars[pos..].iter().position(|&c| c == ':')? + pos;
                search = Some(chars[pos + 1..colon].iter().collect::<String>());
                pos = colon + 1;
                break;
            }
            Some(&c) if TildeFlags::default().set(c) => {
                modifiers.push(pos);
                pos += 1;
            }
            _ => break,
        }
    }

    if let Some(&c) = chars.get(pos).filter(|&&c| is_variable(c)) {
        return Some(TildeSpec {
            flags: flags_from(chars, &modifiers),
            search,
            variable: c,
            end: pos + 1,
        });
    }
    if search.is_some() {
        return None;
    }
    let last = modifiers.pop()?;
    if !is_variable(chars[last]) {
        return None;
    }
    Some(TildeSpec {
        flags: flags_from(chars, &modifiers),
        search: None,
        variable: chars[last],
        end: last + 1,
    })
}

fn flags_from(chars: &[char], positions: &[usize]) -> TildeFlags {
    let mut flags = TildeFlags::default();
    for &p in positions {
        flags.set(chars[p]);
    }
    flags
}

/// Applies the modifiers to the raw value of the variable.
pub fn expand(spec: &TildeSpec, raw: &str, scope: &mut dyn ExpansionScope) -> String {
    let value = params::unquote(raw);
    if spec.flags.is_empty() && spec.search.is_none() {
        return value.to_string();
    }
    let cwd = scope.current_dir();
    let full = match &spec.search {
        Some(var) => {
            let list = scope.variable(var).unwrap_or_default();
            match search_list(&list, value, &cwd) {
                Some(found) => found,
                None => return String::new(),
            }
        }
        None => resolve_path(&cwd, value),
    };
    let flags = spec.flags;
    if flags.is_empty() {
        return full.to_string_lossy().into_owned();
    }

    let metadata = fs::metadata(&full).ok();
    let mut parts = Vec::new();
    if flags.attributes {
        if let Some(meta) = &metadata {
            parts.push(attribute_string(meta));
        }
    }
    if flags.time {
        if let Some(modified) = metadata.as_ref().and_then(|m| m.modified().ok()) {
            parts.push(DateTime::<Local>::from(modified).format("%m/%d/%Y %H:%M").to_string());
        }
    }
    if flags.size {
        if let Some(meta) = &metadata {
            parts.push(meta.len().to_string());
        }
    }
    if flags.any_path_part() {
        let pieces = PathPieces::split(&full);
        let all = flags.full || (flags.short && !(flags.drive || flags.path || flags.name || flags.extension));
        let mut text = String::new();
        if all || flags.drive {
            text.push_str(&pieces.drive);
        }
        if all || flags.path {
            text.push_str(&pieces.directory);
        }
        if all || flags.name {
            text.push_str(&pieces.name);
        }
        if all || flags.extension {
            text.push_str(&pieces.extension);
        }
        if !text.is_empty() {
            parts.push(text);
        }
    }
    parts.join(" ")
}

fn search_list(list: &str, name: &str, cwd: &Path) -> Option<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    list.split([';', separator])
        .filter(|dir| !dir.is_empty())
        .map(|dir| resolve_path(cwd, params::unquote(dir)).join(name))
        .find(|candidate| candidate.exists())
}

fn attribute_string(meta: &Metadata) -> String {
    let mut attrs = ['-'; 9];
    if meta.is_dir() {
        attrs[0] = 'd';
    }
    if meta.permissions().readonly() {
        attrs[1] = 'r';
    }
    if meta.is_file() {
        attrs[2] = 'a';
    }
    if meta.file_type().is_symlink() {
        attrs[8] = 'l';
    }
    attrs.iter().collect()
}

/// Drive, directory (with trailing separator), base name and extension (with dot).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PathPieces {
    pub drive: String,
    pub directory: String,
    pub name: String,
    pub extension: String,
}

impl PathPieces {
    pub fn split(path: &Path) -> Self {
        let text = path.to_string_lossy();
        let (drive, rest) = match text.as_bytes() {
            [letter, b':', ..] if letter.is_ascii_alphabetic() => text.split_at(2),
            _ => ("", text.as_ref()),
        };
        let cut = rest.rfind(['/', '\\']).map(|p| p + 1).unwrap_or(0);
        let (directory, file) = rest.split_at(cut);
        let (name, extension) = match file.rfind('.') {
            Some(dot) if dot > 0 => file.split_at(dot),
            _ => (file, ""),
        };
        Self {
            drive: drive.to_string(),
            directory: directory.to_string(),
            name: name.to_string(),
            extension: extension.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn parses_flags_and_variable() {
        let input = chars("~dpnx1 rest");
        let spec = parse(&input, 0, |c| c.is_ascii_digit()).unwrap();
        assert!(spec.flags.drive && spec.flags.path && spec.flags.name && spec.flags.extension);
        assert_eq!(spec.variable, '1');
        assert_eq!(spec.end, 6);
    }

    #[test]
    fn last_modifier_backs_off_to_variable() {
        let input = chars("~nf ");
        let spec = parse(&input, 0, |c| c == 'f').unwrap();
        assert!(spec.flags.name);
        assert!(!spec.flags.full);
        assert_eq!(spec.variable, 'f');
        assert_eq!(spec.end, 3);
    }

    #[test]
    fn search_list_form() {
        let input = chars("~$PATH:i");
        let spec = parse(&input, 0, |c| c == 'i').unwrap();
        assert_eq!(spec.search.as_deref(), Some("PATH"));
        assert_eq!(spec.variable, 'i');
    }

    #[test]
    fn rejects_non_variables() {
        assert!(parse(&chars("~q"), 0, |c| c.is_ascii_digit()).is_none());
        assert!(parse(&chars("~$PATH"), 0, |c| c == 'i').is_none());
    }

    #[test]
    fn splits_path_pieces() {
        let pieces = PathPieces::split(Path::new("/home/user/report.final.txt"));
        assert_eq!(pieces.drive, "");
        assert_eq!(pieces.directory, "/home/user/");
        assert_eq!(pieces.name, "report.final");
        assert_eq!(pieces.extension, ".txt");

        let pieces = PathPieces::split(Path::new("C:\\dir\\.profile"));
        assert_eq!(pieces.drive, "C:");
        assert_eq!(pieces.directory, "\\dir\\");
        assert_eq!(pieces.name, ".profile");
        assert_eq!(pieces.extension, "");
    }
}
