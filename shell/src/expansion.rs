//! Variable expansion for command text.
//!
//! Expansion happens in two passes. The parse-time pass runs on each physical
//! batch line before lexing and substitutes batch parameters (`%0`-`%9`, `%*`,
//! `%~dp0`). The execution-time pass runs on the text of a
//! single command right before it is dispatched and substitutes FOR variables,
//! environment variables (with substring and replace modifiers) and, when delayed
//! expansion is on, `!name!` references.
//!
//! Both passes build a fresh string and never rescan substituted text.

use crate::context::for_var_index;
use crate::tilde::{self, TildeSpec};
use std::path::PathBuf;

/// Read access to everything an expansion can reference.
pub trait ExpansionScope {
    /// A batch file (or CALLed label) is executing.
    fn in_batch(&self) -> bool;
    /// Batch parameter `n` after SHIFT, quotes kept.
    fn batch_param(&self, n: usize) -> Option<String>;
    /// All batch parameters after `%0`.
    fn batch_params_tail(&self) -> Option<String>;
    /// Value bound to a FOR variable slot in the current context.
    fn for_variable(&self, index: usize) -> Option<String>;
    /// Environment variable, including computed values such as ERRORLEVEL.
    fn variable(&mut self, name: &str) -> Option<String>;
    fn delayed_expansion(&self) -> bool;
    fn current_dir(&self) -> PathBuf;
}

/// Parse-time pass over one physical batch line.
///
/// Outside a batch file the line is returned unchanged.
pub fn expand_at_parse(line: &str, scope: &mut dyn ExpansionScope) -> String {
    if !scope.in_batch() {
        return line.to_string();
    }
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1).copied() {
            // Left for the execution-time pass, which collapses it exactly once.
            Some('%') => {
                out.push_str("%%");
                i += 2;
            }
            Some('~') => match tilde::parse(&chars, i + 1, |c| c.is_ascii_digit()) {
                Some(spec) => {
                    let n = spec.variable as usize - '0' as usize;
                    let raw = scope.batch_param(n).unwrap_or_default();
                    out.push_str(&tilde::expand(&spec, &raw, scope));
                    i = spec.end;
                }
                None => {
                    out.push('%');
                    i += 1;
                }
            },
            Some(d) if d.is_ascii_digit() => {
                let n = d as usize - '0' as usize;
                out.push_str(&scope.batch_param(n).unwrap_or_default());
                i += 2;
            }
            Some('*') => {
                out.push_str(&scope.batch_params_tail().unwrap_or_default());
                i += 2;
            }
            Some(_) => match find_closing(&chars, i + 1, '%') {
                // `%name%` is left for the execution-time pass.
                Some(close) => {
                    out.extend(&chars[i..=close]);
                    i = close + 1;
                }
                None => {
                    out.push('%');
                    i += 1;
                }
            },
            None => {
                out.push('%');
                i += 1;
            }
        }
    }
    out
}

/// Execution-time pass over the text of one command.
pub fn expand_at_execute(text: &str, scope: &mut dyn ExpansionScope) -> String {
    let in_batch = scope.in_batch();
    let delayed = scope.delayed_expansion();
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '%' => i = expand_percent(&chars, i, in_batch, scope, &mut out),
            '!' if delayed => i = expand_bang(&chars, i, in_batch, scope, &mut out),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn expand_percent(
    chars: &[char],
    i: usize,
    in_batch: bool,
    scope: &mut dyn ExpansionScope,
    out: &mut String,
) -> usize {
    match chars.get(i + 1).copied() {
        Some('%') => {
            // In a batch file `%%i` and `%%~nxi` name FOR variables.
            let names_for_variable = in_batch
                && chars
                    .get(i + 2)
                    .is_some_and(|&c| c == '~' || for_var_index(c).is_some_and(|idx| scope.for_variable(idx).is_some()));
            if names_for_variable {
                return expand_percent(chars, i + 1, in_batch, scope, out);
            }
            out.push('%');
            return i + 2;
        }
        Some('~') => {
            let bound = |c: char| for_var_index(c).is_some_and(|idx| scope.for_variable(idx).is_some());
            if let Some(spec) = tilde::parse(chars, i + 1, bound) {
                return expand_for_tilde(&spec, scope, out);
            }
        }
        Some(c) => {
            if let Some(value) = for_var_index(c).and_then(|idx| scope.for_variable(idx)) {
                out.push_str(&value);
                return i + 2;
            }
        }
        None => {}
    }
    match find_closing(chars, i + 1, '%') {
        Some(close) if close > i + 1 => {
            let body: String = chars[i + 1..close].iter().collect();
            match expand_variable(&body, scope) {
                Some(value) => out.push_str(&value),
                None if in_batch => {}
                None => out.extend(&chars[i..=close]),
            }
            close + 1
        }
        _ => {
            out.push('%');
            i + 1
        }
    }
}

fn expand_for_tilde(spec: &TildeSpec, scope: &mut dyn ExpansionScope, out: &mut String) -> usize {
    let raw = for_var_index(spec.variable)
        .and_then(|idx| scope.for_variable(idx))
        .unwrap_or_default();
    out.push_str(&tilde::expand(spec, &raw, scope));
    spec.end
}

fn expand_bang(
    chars: &[char],
    i: usize,
    in_batch: bool,
    scope: &mut dyn ExpansionScope,
    out: &mut String,
) -> usize {
    if chars.get(i + 1) == Some(&'!') {
        out.push('!');
        return i + 2;
    }
    match find_closing(chars, i + 1, '!') {
        Some(close) => {
            let body: String = chars[i + 1..close].iter().collect();
            match expand_variable(&body, scope) {
                Some(value) => out.push_str(&value),
                None if in_batch => {}
                None => out.extend(&chars[i..=close]),
            }
            close + 1
        }
        // A lone `!` is dropped.
        None => i + 1,
    }
}

fn find_closing(chars: &[char], from: usize, delim: char) -> Option<usize> {
    chars[from.min(chars.len())..]
        .iter()
        .position(|&c| c == delim)
        .map(|p| p + from)
}

/// Resolves `name`, `name:~start,len` or `name:find=replace`.
///
/// Returns `None` when the variable is not defined or the modifier is not recognised,
/// in which case the caller decides whether the reference stays literal.
pub fn expand_variable(body: &str, scope: &mut dyn ExpansionScope) -> Option<String> {
    let (name, modifier) = split_modifier(body);
    if name.is_empty() {
        return None;
    }
    let value = scope.variable(name)?;
    match modifier {
        None => Some(value),
        Some(m) => match m.strip_prefix('~') {
            Some(range) => Some(substring(&value, range)),
            None => {
                let (find, replace) = m.split_once('=')?;
                Some(replace_first(&value, find, replace))
            }
        },
    }
}

fn split_modifier(body: &str) -> (&str, Option<&str>) {
    // `=C:` style per-drive names keep their colon.
    let search_from = if body.starts_with('=') {
        body.char_indices().nth(3).map_or(body.len(), |(i, _)| i)
    } else {
        0
    };
    match body[search_from..].find(':') {
        Some(pos) => {
            let at = search_from + pos;
            (&body[..at], Some(&body[at + 1..]))
        }
        None => (body, None),
    }
}

/// `start[,length]` substring with negative offsets counted from the end.
///
/// Out-of-range offsets clamp; a malformed specification yields an empty string.
pub fn substring(value: &str, range: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let (start, count) = match range.split_once(',') {
        Some((s, l)) => (s, Some(l)),
        None => (range, None),
    };
    let Some(start) = parse_offset(start) else {
        return String::new();
    };
    let begin = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let end = match count {
        None => len,
        Some(l) => match parse_offset(l) {
            Some(l) if l < 0 => (len + l).max(begin),
            Some(l) => (begin + l).min(len),
            None => return String::new(),
        },
    };
    if end <= begin {
        return String::new();
    }
    chars[begin as usize..end as usize].iter().collect()
}

fn parse_offset(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0);
    }
    text.parse().ok()
}

/// Replaces the first case-insensitive occurrence of `find`.
///
/// `*find` replaces everything up to and including the first occurrence.
pub fn replace_first(value: &str, find: &str, replace: &str) -> String {
    let (prefix_mode, needle) = match find.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, find),
    };
    if needle.is_empty() {
        return value.to_string();
    }
    let Some(pos) = find_ignore_case(value, needle) else {
        return value.to_string();
    };
    let tail = &value[pos + needle.len()..];
    if prefix_mode {
        format!("{replace}{tail}")
    } else {
        format!("{}{replace}{tail}", &value[..pos])
    }
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| {
            haystack
                .get(i..i + needle.len())
                .is_some_and(|s| s.eq_ignore_ascii_case(needle))
        })
}

/// Integer literal: decimal, `0`-prefixed octal or `0x` hex, with an optional sign.
///
/// The whole string must be consumed.
pub fn parse_integer(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (digits, radix) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (hex, 16)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8)
    } else {
        (body, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Scope {
        vars: HashMap<String, String>,
        params: Vec<String>,
        for_vars: HashMap<usize, String>,
        batch: bool,
        delayed: bool,
    }

    impl ExpansionScope for Scope {
        fn in_batch(&self) -> bool {
            self.batch
        }
        fn batch_param(&self, n: usize) -> Option<String> {
            self.params.get(n).cloned()
        }
        fn batch_params_tail(&self) -> Option<String> {
            Some(self.params.iter().skip(1).cloned().collect::<Vec<_>>().join(" "))
        }
        fn for_variable(&self, index: usize) -> Option<String> {
            self.for_vars.get(&index).cloned()
        }
        fn variable(&mut self, name: &str) -> Option<String> {
            self.vars.get(&name.to_ascii_uppercase()).cloned()
        }
        fn delayed_expansion(&self) -> bool {
            self.delayed
        }
        fn current_dir(&self) -> PathBuf {
            PathBuf::from("/work")
        }
    }

    fn scope_with(vars: &[(&str, &str)]) -> Scope {
        Scope {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v.to_string()))
                .collect(),
            ..Scope::default()
        }
    }

    #[test]
    fn substring_forms() {
        let mut scope = scope_with(&[("s", "HelloWorld")]);
        assert_eq!(expand_at_execute("%s:~0,5%", &mut scope), "Hello");
        assert_eq!(expand_at_execute("%s:~-5%", &mut scope), "World");
        assert_eq!(expand_at_execute("%s:~2,-2%", &mut scope), "lloWor");
        assert_eq!(expand_at_execute("%s:~100%", &mut scope), "");
        assert_eq!(expand_at_execute("%s:~x,1%", &mut scope), "");
    }

    #[test]
    fn drive_names_with_wide_characters() {
        let mut scope = scope_with(&[("=C:", "C:\\dir")]);
        assert_eq!(expand_at_execute("%=C:%", &mut scope), "C:\\dir");
        assert_eq!(split_modifier("=a\u{e9}"), ("=a\u{e9}", None));
        assert_eq!(split_modifier("=\u{e9}\u{e9}x:~1"), ("=\u{e9}\u{e9}x", Some("~1")));
        assert_eq!(expand_at_execute("[%=a\u{e9}%]", &mut scope), "[%=a\u{e9}%]");
    }

    #[test]
    fn replace_is_case_insensitive_and_first_only() {
        let mut scope = scope_with(&[("s", "a-B-b")]);
        assert_eq!(expand_at_execute("%s:b=x%", &mut scope), "a-x-b");
        assert_eq!(expand_at_execute("%s:*-=%", &mut scope), "B-b");
    }

    #[test]
    fn undefined_variable_literal_interactively_removed_in_batch() {
        let mut scope = scope_with(&[]);
        assert_eq!(expand_at_execute("[%nope%]", &mut scope), "[%nope%]");
        scope.batch = true;
        assert_eq!(expand_at_execute("[%nope%]", &mut scope), "[]");
    }

    #[test]
    fn parse_pass_handles_params_and_leaves_names() {
        let mut scope = Scope {
            batch: true,
            params: vec!["run.cmd".into(), "\"one two\"".into(), "three".into()],
            ..scope_with(&[("x", "1")])
        };
        assert_eq!(
            expand_at_parse("%1 %~1 %2 %3 %x% 100%% %*", &mut scope),
            "\"one two\" one two three  %x% 100%% \"one two\" three"
        );
    }

    #[test]
    fn double_percent_collapses_once() {
        let mut scope = scope_with(&[("path", "/bin")]);
        scope.batch = true;
        let parsed = expand_at_parse("%%%% %%PATH%%", &mut scope);
        assert_eq!(parsed, "%%%% %%PATH%%");
        assert_eq!(expand_at_execute(&parsed, &mut scope), "%% %PATH%");
        scope.batch = false;
        assert_eq!(expand_at_execute("100%% %%PATH%%", &mut scope), "100% %PATH%");
    }

    #[test]
    fn doubled_percent_names_for_variable_in_batch() {
        let mut scope = scope_with(&[]);
        scope.batch = true;
        scope.for_vars.insert(for_var_index('f').unwrap(), "/tmp/a.txt".into());
        assert_eq!(expand_at_execute("%%f %%~nxf %%g", &mut scope), "/tmp/a.txt a.txt %g");
    }

    #[test]
    fn for_variable_takes_priority() {
        let mut scope = scope_with(&[("i", "env")]);
        scope.for_vars.insert(for_var_index('i').unwrap(), "loop".into());
        assert_eq!(expand_at_execute("%i %i%", &mut scope), "loop loop%");
    }

    #[test]
    fn delayed_expansion_bangs() {
        let mut scope = scope_with(&[("v", "7")]);
        scope.delayed = true;
        assert_eq!(expand_at_execute("!v! !! x!", &mut scope), "7 ! x");
        scope.delayed = false;
        assert_eq!(expand_at_execute("!v!", &mut scope), "!v!");
    }

    #[test]
    fn integer_literals() {
        assert_eq!(parse_integer("10"), Some(10));
        assert_eq!(parse_integer("-010"), Some(-8));
        assert_eq!(parse_integer("0x1F"), Some(31));
        assert_eq!(parse_integer("10a"), None);
        assert_eq!(parse_integer("08"), None);
        assert_eq!(parse_integer(""), None);
    }
}
