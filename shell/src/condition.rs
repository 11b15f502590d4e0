//! IF conditions: parsing from command text and evaluation.

use crate::error::ParsingError;
use crate::expansion::parse_integer;
use crate::params;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`, always a string comparison.
    Equal,
    Lss,
    Leq,
    Equ,
    Neq,
    Geq,
    Gtr,
}

impl CompareOp {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word.to_ascii_lowercase().as_str() {
            "lss" => CompareOp::Lss,
            "leq" => CompareOp::Leq,
            "equ" => CompareOp::Equ,
            "neq" => CompareOp::Neq,
            "geq" => CompareOp::Geq,
            "gtr" => CompareOp::Gtr,
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal | CompareOp::Equ => ordering == Ordering::Equal,
            CompareOp::Neq => ordering != Ordering::Equal,
            CompareOp::Lss => ordering == Ordering::Less,
            CompareOp::Leq => ordering != Ordering::Greater,
            CompareOp::Geq => ordering != Ordering::Less,
            CompareOp::Gtr => ordering == Ordering::Greater,
        }
    }
}

/// Operands are kept unexpanded; they are expanded when the condition is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    ErrorLevel(String),
    Exist(String),
    Defined(String),
    Compare {
        op: CompareOp,
        left: String,
        right: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub negated: bool,
    pub case_insensitive: bool,
    pub test: Test,
}

/// What a condition needs from the interpreter.
pub trait ConditionScope {
    fn expand(&mut self, text: &str) -> String;
    fn errorlevel(&self) -> i32;
    fn is_defined(&self, name: &str) -> bool;
    fn exists(&self, path: &str) -> bool;
}

/// Length in bytes of the condition at the start of `text`.
pub fn scan(text: &str) -> Result<usize, ParsingError> {
    if text.starts_with("/?") {
        return Ok(2);
    }
    IfCondition::parse(text).map(|(_, consumed)| consumed)
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    text[pos..]
        .find(|c: char| c != ' ' && c != '\t')
        .map_or(text.len(), |p| pos + p)
}

/// Reads a quote-aware word; with `stop_at_equals` an unquoted `==` also ends it.
fn read_word(text: &str, pos: usize, stop_at_equals: bool) -> (&str, usize) {
    let mut quoted = false;
    for (i, c) in text[pos..].char_indices() {
        let at = pos + i;
        match c {
            '"' => quoted = !quoted,
            ' ' | '\t' if !quoted => return (&text[pos..at], at),
            '=' if !quoted && stop_at_equals && text[at..].starts_with("==") => {
                return (&text[pos..at], at);
            }
            _ => {}
        }
    }
    (&text[pos..], text.len())
}

impl IfCondition {
    /// Parses a condition and returns it with the number of bytes consumed.
    pub fn parse(text: &str) -> Result<(Self, usize), ParsingError> {
        let mut pos = skip_whitespace(text, 0);
        let mut negated = false;
        let mut case_insensitive = false;
        loop {
            let (word, end) = read_word(text, pos, false);
            if !case_insensitive && word.eq_ignore_ascii_case("/i") {
                case_insensitive = true;
            } else if !negated && word.eq_ignore_ascii_case("not") {
                negated = true;
            } else {
                break;
            }
            pos = skip_whitespace(text, end);
        }

        let (word, end) = read_word(text, pos, true);
        if word.is_empty() {
            return Err(ParsingError::UnexpectedEnd);
        }
        let after = skip_whitespace(text, end);
        let make = |test| IfCondition {
            negated,
            case_insensitive,
            test,
        };

        let unary: Option<fn(String) -> Test> = match word.to_ascii_lowercase().as_str() {
            "errorlevel" => Some(Test::ErrorLevel),
            "exist" => Some(Test::Exist),
            "defined" => Some(Test::Defined),
            _ => None,
        };
        if let Some(kind) = unary.filter(|_| !text[after..].starts_with("==")) {
            let (operand, end) = read_word(text, after, false);
            if operand.is_empty() {
                return Err(ParsingError::UnexpectedEnd);
            }
            return Ok((make(kind(operand.to_string())), end));
        }

        let (op, right_start) = if text[after..].starts_with("==") {
            (CompareOp::Equal, skip_whitespace(text, after + 2))
        } else {
            let (op_word, op_end) = read_word(text, after, false);
            if op_word.is_empty() {
                return Err(ParsingError::UnexpectedEnd);
            }
            let op = CompareOp::from_word(op_word)
                .ok_or_else(|| ParsingError::UnexpectedToken(op_word.to_string()))?;
            (op, skip_whitespace(text, op_end))
        };
        let (right, end) = read_word(text, right_start, false);
        if right.is_empty() {
            return Err(ParsingError::UnexpectedEnd);
        }
        let test = Test::Compare {
            op,
            left: word.to_string(),
            right: right.to_string(),
        };
        Ok((make(test), end))
    }

    pub fn evaluate(&self, scope: &mut dyn ConditionScope) -> bool {
        let result = match &self.test {
            Test::ErrorLevel(operand) => {
                let level = scope.expand(operand);
                parse_integer(&level).is_some_and(|n| i64::from(scope.errorlevel()) >= n)
            }
            Test::Exist(operand) => {
                let path = scope.expand(operand);
                scope.exists(params::unquote(&path))
            }
            Test::Defined(operand) => {
                let name = scope.expand(operand);
                scope.is_defined(&name)
            }
            Test::Compare { op, left, right } => {
                let left = scope.expand(left);
                let right = scope.expand(right);
                op.holds(self.compare(*op, &left, &right))
            }
        };
        result != self.negated
    }

    fn compare(&self, op: CompareOp, left: &str, right: &str) -> Ordering {
        if op != CompareOp::Equal {
            if let (Some(a), Some(b)) = (parse_integer(left), parse_integer(right)) {
                return a.cmp(&b);
            }
        }
        if self.case_insensitive {
            left.to_lowercase().cmp(&right.to_lowercase())
        } else {
            left.cmp(right)
        }
    }
}
