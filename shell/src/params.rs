//! Quote-aware extraction of delimited parameters from a raw command line.
//!
//! Quotes group delimiters into a single parameter but are kept in the
//! returned text; callers strip them with [`unquote`] when needed.

/// Separators for batch arguments and FOR sets.
pub const PARAM_DELIMS: &str = " \t,=;";
/// Separators for command words.
pub const WHITESPACE: &str = " \t";

/// One parameter: its text and byte range in the source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Splits `line` into parameters separated by any character of `delims`.
pub fn split<'a>(line: &'a str, delims: &str) -> Vec<Param<'a>> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        if c == '"' {
            quoted = !quoted;
            start.get_or_insert(i);
            continue;
        }
        if !quoted && delims.contains(c) {
            if let Some(s) = start.take() {
                out.push(Param { text: &line[s..i], start: s, end: i });
            }
        } else {
            start.get_or_insert(i);
        }
    }
    if let Some(s) = start {
        out.push(Param { text: &line[s..], start: s, end: line.len() });
    }
    out
}

/// Returns the `n`th (zero-based) parameter.
pub fn nth<'a>(line: &'a str, n: usize, delims: &str) -> Option<&'a str> {
    split(line, delims).get(n).map(|p| p.text)
}

/// Returns the text following parameter `n`, with leading delimiters removed.
pub fn rest_after<'a>(line: &'a str, n: usize, delims: &str) -> &'a str {
    match split(line, delims).get(n) {
        Some(p) => line[p.end..].trim_start_matches(|c| delims.contains(c)),
        None => "",
    }
}

/// Splits a command line into its first whitespace-delimited word and the remainder.
///
/// The remainder keeps its leading whitespace, the way builtins receive it.
pub fn split_first(line: &str) -> (&str, &str) {
    match split(line, WHITESPACE).first() {
        Some(p) => (p.text, &line[p.end..]),
        None => ("", ""),
    }
}

/// Removes one pair of surrounding double quotes, or a lone leading quote.
pub fn unquote(s: &str) -> &str {
    match s.strip_prefix('"') {
        Some(inner) => inner.strip_suffix('"').unwrap_or(inner),
        None => s,
    }
}

/// Removes every double quote from `s`.
pub fn remove_quotes(s: &str) -> String {
    s.chars().filter(|&c| c != '"').collect()
}
