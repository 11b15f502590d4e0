//! FOR statement headers: `/D /R /L /F` options, the loop variable and the set.

use crate::context::for_var_index;
use crate::error::ParsingError;
use crate::expansion::parse_integer;
use crate::params::{self, PARAM_DELIMS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForFlags {
    pub recurse: bool,
    pub include_files: bool,
    pub include_dirs: bool,
}

impl Default for ForFlags {
    fn default() -> Self {
        Self {
            recurse: false,
            include_files: true,
            include_dirs: false,
        }
    }
}

/// `/F` parsing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSetOptions {
    pub eol: Option<char>,
    pub skip: usize,
    pub use_backq: bool,
    pub delims: String,
    pub tokens: TokenSpec,
}

impl Default for FileSetOptions {
    fn default() -> Self {
        Self {
            eol: Some(';'),
            skip: 0,
            use_backq: false,
            delims: " \t".to_string(),
            tokens: TokenSpec {
                indices: vec![1],
                rest: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForKind {
    FileTree { root: Option<String> },
    FileSet(FileSetOptions),
    Numbers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForControl {
    pub kind: ForKind,
    pub flags: ForFlags,
    pub variable_index: usize,
    /// The set, unexpanded.
    pub set: String,
}

impl ForControl {
    /// Builds the control block from the header text (options and variable) and the set.
    pub fn parse(header: &str, set: &str) -> Result<Self, ParsingError> {
        let (kind, flags, variable_index, _) = parse_header(header)?;
        Ok(Self {
            kind,
            flags,
            variable_index,
            set: set.to_string(),
        })
    }
}

/// Length in bytes of the header (options and `%x` variable) at the start of `text`.
pub fn scan_header(text: &str) -> Result<usize, ParsingError> {
    parse_header(text).map(|(.., consumed)| consumed)
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    text[pos..]
        .find(|c: char| c != ' ' && c != '\t')
        .map_or(text.len(), |p| pos + p)
}

fn word_at(text: &str, pos: usize) -> &str {
    params::nth(&text[pos..], 0, " \t").unwrap_or("")
}

fn parse_header(text: &str) -> Result<(ForKind, ForFlags, usize, usize), ParsingError> {
    let mut flags = ForFlags::default();
    let mut kind = ForKind::FileTree { root: None };
    let mut seen: Vec<char> = Vec::new();
    let mut pos = skip_whitespace(text, 0);

    while text[pos..].starts_with('/') {
        let option = text[pos + 1..].chars().next().map(|c| c.to_ascii_lowercase());
        let clash = match option {
            Some('l' | 'f') => !seen.is_empty(),
            Some('d' | 'r') => seen.iter().any(|&c| c == 'l' || c == 'f' || Some(c) == option),
            _ => true,
        };
        if clash {
            return Err(ParsingError::UnexpectedToken(word_at(text, pos).to_string()));
        }
        pos += 2;
        match option {
            Some('d') => {
                flags.include_dirs = true;
                flags.include_files = false;
            }
            Some('r') => {
                flags.recurse = true;
                pos = skip_whitespace(text, pos);
                if !text[pos..].starts_with(['%', '/']) && pos < text.len() {
                    let root = word_at(text, pos);
                    pos += root.len();
                    kind = ForKind::FileTree {
                        root: Some(params::unquote(root).to_string()),
                    };
                }
            }
            Some('l') => kind = ForKind::Numbers,
            _ => {
                pos = skip_whitespace(text, pos);
                let mut options = FileSetOptions::default();
                if text[pos..].starts_with('"') {
                    let close = text[pos + 1..]
                        .find('"')
                        .map_or(text.len(), |p| pos + 1 + p);
                    options = parse_fileset_options(&text[pos + 1..close])?;
                    pos = (close + 1).min(text.len());
                }
                kind = ForKind::FileSet(options);
            }
        }
        seen.extend(option);
        pos = skip_whitespace(text, pos);
    }

    // Batch files double the percent sign.
    if text[pos..].starts_with("%%") && text.len() > pos + 2 {
        pos += 1;
    }
    let mut chars = text[pos..].chars();
    let index = match (chars.next(), chars.next()) {
        (Some('%'), Some(c)) => for_var_index(c),
        _ => None,
    };
    let Some(index) = index else {
        let word = word_at(text, pos);
        return Err(if word.is_empty() {
            ParsingError::UnexpectedEnd
        } else {
            ParsingError::UnexpectedToken(word.to_string())
        });
    };
    pos += 2;
    if !matches!(text[pos..].chars().next(), None | Some(' ' | '\t')) {
        return Err(ParsingError::UnexpectedToken(word_at(text, pos - 2).to_string()));
    }
    Ok((kind, flags, index, pos))
}

/// Parses the quoted `/F` options string.
pub fn parse_fileset_options(text: &str) -> Result<FileSetOptions, ParsingError> {
    let mut options = FileSetOptions::default();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let starts = |i: usize, word: &str| {
        let n = word.len();
        chars.len() >= i + n
            && chars[i..i + n]
                .iter()
                .zip(word.chars())
                .all(|(a, b)| a.to_ascii_lowercase() == b)
    };
    let run_from = |i: usize| -> String { chars[i..].iter().take_while(|c| !c.is_whitespace()).collect() };

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
        } else if starts(i, "eol=") {
            i += 4;
            options.eol = chars.get(i).copied();
            i += 1;
        } else if starts(i, "skip=") {
            i += 5;
            let value = run_from(i);
            i += value.chars().count();
            options.skip = parse_integer(&value)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| ParsingError::UnexpectedToken(format!("skip={value}")))?;
        } else if starts(i, "usebackq") {
            i += 8;
            options.use_backq = true;
        } else if starts(i, "delims=") {
            i += 7;
            let mut delims = String::new();
            while i < chars.len() && chars[i] != ' ' {
                delims.push(chars[i]);
                i += 1;
            }
            // A space is a delimiter only when it ends the options string.
            if i == chars.len() - 1 {
                delims.push(' ');
                i += 1;
            }
            options.delims = delims;
        } else if starts(i, "tokens=") {
            i += 7;
            let value = run_from(i);
            i += value.chars().count();
            options.tokens = TokenSpec::parse(&value)
                .ok_or_else(|| ParsingError::UnexpectedToken(format!("tokens={value}")))?;
        } else {
            return Err(ParsingError::UnexpectedToken(run_from(i)));
        }
    }
    Ok(options)
}

/// Which tokens of a line are bound to consecutive loop variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    /// One-based token numbers, ascending and unique.
    pub indices: Vec<usize>,
    /// A trailing `*`: the remainder of the line after the last listed token.
    pub rest: bool,
}

impl TokenSpec {
    pub fn parse(text: &str) -> Option<Self> {
        let mut indices = Vec::new();
        let mut rest = false;
        let mut duplicate = false;
        for item in text.split(',') {
            if rest {
                return None;
            }
            let item = match item.strip_suffix('*') {
                Some(stripped) => {
                    rest = true;
                    stripped
                }
                None => item,
            };
            if item.is_empty() {
                if rest {
                    continue;
                }
                return None;
            }
            let (from, to) = match item.split_once('-') {
                Some((a, b)) => (parse_index(a)?, parse_index(b)?),
                None => {
                    let n = parse_index(item)?;
                    (n, n)
                }
            };
            for n in from..=to {
                if indices.contains(&n) {
                    duplicate = true;
                } else {
                    indices.push(n);
                }
            }
        }
        indices.sort_unstable();
        if indices.is_empty() && !rest {
            return None;
        }
        Some(Self {
            indices,
            rest: rest && !duplicate,
        })
    }
}

fn parse_index(text: &str) -> Option<usize> {
    let n = parse_integer(text)?;
    usize::try_from(n).ok().filter(|&n| n >= 1)
}

/// Splits one line according to the `/F` options.
///
/// Returns `None` when the line is skipped: empty, starting with the eol character,
/// or yielding none of the requested tokens. Otherwise returns one value per loop
/// variable, `None` for tokens the line does not have.
pub fn split_line(line: &str, options: &FileSetOptions) -> Option<Vec<Option<String>>> {
    if line.is_empty() {
        return None;
    }
    let is_delim = |c: char| options.delims.contains(c);
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (is_delim(c), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, line.len()));
    }

    if let (Some(eol), Some(&(first, _))) = (options.eol, spans.first()) {
        if line[first..].starts_with(eol) {
            return None;
        }
    }

    let spec = &options.tokens;
    let mut values: Vec<Option<String>> = spec
        .indices
        .iter()
        .map(|&n| spans.get(n - 1).map(|&(s, e)| line[s..e].to_string()))
        .collect();
    if spec.rest {
        let next = spec.indices.last().copied().unwrap_or(0);
        values.push(spans.get(next).map(|&(s, _)| line[s..].to_string()));
    }
    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(values)
}

/// The `/L` sequence `start, step, end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberRange {
    next: Option<i64>,
    step: i64,
    end: i64,
}

impl NumberRange {
    /// Parses up to three numbers from the expanded set; missing values are 0.
    pub fn parse(set: &str) -> Self {
        let mut numbers = params::split(set, PARAM_DELIMS)
            .into_iter()
            .map(|p| parse_integer(p.text).unwrap_or(0));
        let start = numbers.next().unwrap_or(0);
        let step = numbers.next().unwrap_or(0);
        let end = numbers.next().unwrap_or(0);
        Self {
            next: Some(start),
            step,
            end,
        }
    }
}

impl Iterator for NumberRange {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let value = self.next?;
        // A zero step counts as ascending.
        let more = if self.step < 0 {
            value >= self.end
        } else {
            value <= self.end
        };
        if !more {
            self.next = None;
            return None;
        }
        self.next = value.checked_add(self.step);
        Some(value)
    }
}
