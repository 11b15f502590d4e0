//! A module implementing lexical analysis (tokenization) of command lines.
//!
//! The lexer is fed one physical line at a time. A logical command line may span
//! several physical lines: while a `(` block is open, while a FOR set is open, or
//! when the line ends in an escaping caret. [`Lexer::push_line`] reports whether more
//! input is needed and [`Lexer::finish`] returns the tokens.

use crate::condition;
use crate::error::LexingError;
use crate::for_control;
use crate::parser::{RedirectKind, Redirection};
use std::fmt;
use tracing::warn;

/// Longest logical line accepted; the excess is dropped.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Text of a simple command, also used for IF conditions, FOR options and FOR sets.
    Command(String),
    Redirect(Redirection),
    /// `&`
    Concat,
    /// `|`
    Pipe,
    /// `&&`
    And,
    /// `||`
    Or,
    Open,
    Close,
    If,
    Else,
    For,
    In,
    Do,
    /// End of a physical line inside a block.
    Eol,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Command(text) => {
                let word = text.split_whitespace().next().unwrap_or(text);
                write!(f, "{word}")
            }
            Token::Redirect(r) => write!(f, "{r}"),
            Token::Concat => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Do => write!(f, "do"),
            Token::Eol => write!(f, "(newline)"),
        }
    }
}

/// Outcome of feeding one physical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Complete,
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    /// A command may begin: keywords, `(`, labels and comments are recognised here.
    CommandStart,
    InCommand,
    /// Just after a block's `)`, where `else` may follow.
    AfterBlock,
    /// FOR options consumed, `in` expected.
    ForIn,
    /// `in` consumed, `(` expected.
    ForOpen,
    /// Inside the FOR set.
    ForSet,
    /// Set closed, `do` expected.
    ForDo,
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    depth: usize,
    quoted: bool,
    buffer: String,
    redirects: Vec<Redirection>,
    set: String,
    continued: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            input: Vec::new(),
            pos: 0,
            state: LexingState::CommandStart,
            depth: 0,
            quoted: false,
            buffer: String::new(),
            redirects: Vec::new(),
            set: String::new(),
            continued: false,
            tokens: Vec::new(),
        }
    }

    /// Lexes one physical line.
    pub fn push_line(&mut self, line: &str) -> Result<LineStatus, LexingError> {
        self.input = line.chars().collect();
        if self.input.len() > MAX_LINE_LENGTH {
            warn!(length = self.input.len(), "line too long, truncating");
            self.input.truncate(MAX_LINE_LENGTH);
        }
        self.pos = 0;
        self.quoted = false;

        if self.continued {
            // The caret escaped the line break and escapes the first character too.
            let Some(ch) = self.read_char() else {
                return Ok(LineStatus::NeedMore);
            };
            self.continued = false;
            if matches!(self.state, LexingState::CommandStart | LexingState::AfterBlock) {
                self.state = LexingState::InCommand;
            }
            self.buffer.push(ch);
        }

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::CommandStart => self.handle_command_start(ch)?,
                LexingState::InCommand => self.handle_command(ch)?,
                LexingState::AfterBlock => self.handle_after_block(ch)?,
                LexingState::ForIn => self.handle_for_in(ch)?,
                LexingState::ForOpen => self.handle_for_open(ch)?,
                LexingState::ForSet => self.handle_for_set(ch),
                LexingState::ForDo => self.handle_for_do(ch)?,
            }
            if self.continued {
                return Ok(LineStatus::NeedMore);
            }
        }
        self.end_of_line()
    }

    /// Ends the input and returns the tokens.
    pub fn finish(mut self) -> Result<Vec<Token>, LexingError> {
        match self.state {
            LexingState::ForIn | LexingState::ForOpen | LexingState::ForSet | LexingState::ForDo => {
                return Err(LexingError::UnbalancedParenthesis);
            }
            _ => self.flush(),
        }
        if self.depth > 0 {
            return Err(LexingError::UnbalancedParenthesis);
        }
        while self.tokens.last() == Some(&Token::Eol) {
            self.tokens.pop();
        }
        Ok(self.tokens)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn rest(&self) -> String {
        self.input[self.pos..].iter().collect()
    }

    /// Matches `word` starting at the character just read.
    fn keyword_here(&mut self, word: &str, allow_paren: bool) -> bool {
        let start = self.pos - 1;
        let len = word.chars().count();
        let Some(slice) = self.input.get(start..start + len) else {
            return false;
        };
        if !slice
            .iter()
            .zip(word.chars())
            .all(|(a, b)| a.to_ascii_lowercase() == b)
        {
            return false;
        }
        let boundary = match self.input.get(start + len) {
            None | Some(' ' | '\t') => true,
            Some('(') => allow_paren,
            _ => false,
        };
        if boundary {
            self.pos = start + len;
        }
        boundary
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    fn handle_command_start(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' | '@' => {}
            ':' => self.take_rest_of_line(ch),
            '(' => {
                self.flush();
                self.tokens.push(Token::Open);
                self.depth += 1;
            }
            ')' => self.close_block(),
            '<' | '>' => self.read_redirection(ch, None)?,
            d if d.is_ascii_digit() && matches!(self.peek_char(), Some('<' | '>')) => {
                let op = self.read_char().unwrap_or('>');
                self.read_redirection(op, d.to_digit(10))?;
            }
            _ if self.keyword_here("rem", false) => {
                self.pos -= 2;
                self.take_rest_of_line(ch);
            }
            _ if self.keyword_here("if", false) => self.lex_if()?,
            _ if self.keyword_here("for", false) => self.lex_for()?,
            _ => {
                self.state = LexingState::InCommand;
                self.handle_command(ch)?;
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, ch: char) -> Result<(), LexingError> {
        if self.quoted {
            self.buffer.push(ch);
            if ch == '"' {
                self.quoted = false;
            }
            return Ok(());
        }
        match ch {
            '"' => {
                self.quoted = true;
                self.buffer.push(ch);
            }
            '^' => match self.read_char() {
                Some(escaped) => self.buffer.push(escaped),
                None => self.continued = true,
            },
            '&' | '|' => self.read_operator(ch),
            '<' | '>' => {
                let fd = self.take_fd_prefix();
                self.read_redirection(ch, fd)?;
            }
            ')' if self.depth > 0 => self.close_block(),
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn handle_after_block(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' => {}
            ')' => self.close_block(),
            '&' | '|' => self.read_operator(ch),
            '<' | '>' => self.read_redirection(ch, None)?,
            d if d.is_ascii_digit() && matches!(self.peek_char(), Some('<' | '>')) => {
                let op = self.read_char().unwrap_or('>');
                self.read_redirection(op, d.to_digit(10))?;
            }
            _ if self.keyword_here("else", true) => {
                self.flush();
                self.tokens.push(Token::Else);
                self.state = LexingState::CommandStart;
            }
            _ => {
                self.state = LexingState::InCommand;
                self.handle_command(ch)?;
            }
        }
        Ok(())
    }

    fn handle_for_in(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' => Ok(()),
            _ if self.keyword_here("in", true) => {
                self.tokens.push(Token::In);
                self.state = LexingState::ForOpen;
                Ok(())
            }
            _ => Err(self.unexpected_word()),
        }
    }

    fn handle_for_open(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' => Ok(()),
            '(' => {
                self.tokens.push(Token::Open);
                self.state = LexingState::ForSet;
                Ok(())
            }
            _ => Err(self.unexpected_word()),
        }
    }

    fn handle_for_set(&mut self, ch: char) {
        match ch {
            '"' => {
                self.quoted = !self.quoted;
                self.set.push(ch);
            }
            ')' if !self.quoted => {
                let set = std::mem::take(&mut self.set);
                let set = set.trim();
                if !set.is_empty() {
                    self.tokens.push(Token::Command(set.to_string()));
                }
                self.tokens.push(Token::Close);
                self.state = LexingState::ForDo;
            }
            c => self.set.push(c),
        }
    }

    fn handle_for_do(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' => Ok(()),
            _ if self.keyword_here("do", true) => {
                self.tokens.push(Token::Do);
                self.state = LexingState::CommandStart;
                Ok(())
            }
            _ => Err(self.unexpected_word()),
        }
    }

    fn unexpected_word(&self) -> LexingError {
        let start = self.pos.saturating_sub(1);
        let word: String = self.input[start..]
            .iter()
            .take_while(|c| !c.is_whitespace())
            .collect();
        LexingError::Unexpected(word)
    }

    /// `rem` and `:label` lines are opaque up to the end of the physical line.
    fn take_rest_of_line(&mut self, first: char) {
        self.buffer.push(first);
        let rest = self.rest();
        self.buffer.push_str(&rest);
        self.pos = self.input.len();
        self.state = LexingState::InCommand;
    }

    fn lex_if(&mut self) -> Result<(), LexingError> {
        self.flush();
        self.tokens.push(Token::If);
        self.skip_whitespace();
        let rest = self.rest();
        let consumed = condition::scan(&rest)?;
        let condition = &rest[..consumed];
        self.tokens.push(Token::Command(condition.trim_end().to_string()));
        self.pos += condition.chars().count();
        self.state = LexingState::CommandStart;
        Ok(())
    }

    fn lex_for(&mut self) -> Result<(), LexingError> {
        self.flush();
        self.tokens.push(Token::For);
        self.skip_whitespace();
        let rest = self.rest();
        if rest.starts_with("/?") {
            self.tokens.push(Token::Command("/?".to_string()));
            self.pos += 2;
            self.state = LexingState::CommandStart;
            return Ok(());
        }
        let consumed = for_control::scan_header(&rest)?;
        let header = &rest[..consumed];
        self.tokens.push(Token::Command(header.trim_end().to_string()));
        self.pos += header.chars().count();
        self.state = LexingState::ForIn;
        Ok(())
    }

    fn read_operator(&mut self, ch: char) {
        self.flush();
        let doubled = self.peek_char() == Some(ch);
        if doubled {
            self.pos += 1;
        }
        self.tokens.push(match (ch, doubled) {
            ('&', false) => Token::Concat,
            ('&', true) => Token::And,
            (_, false) => Token::Pipe,
            (_, true) => Token::Or,
        });
        self.state = LexingState::CommandStart;
    }

    /// A lone digit right before `<` or `>` names the redirected handle.
    fn take_fd_prefix(&mut self) -> Option<u32> {
        let digit = self.buffer.chars().last()?.to_digit(10)?;
        let before = &self.buffer[..self.buffer.len() - 1];
        if before.is_empty() || before.ends_with([' ', '\t']) {
            self.buffer.pop();
            Some(digit)
        } else {
            None
        }
    }

    fn read_redirection(&mut self, ch: char, fd: Option<u32>) -> Result<(), LexingError> {
        let input = ch == '<';
        let fd = fd.unwrap_or(if input { 0 } else { 1 });
        let append = !input && self.peek_char() == Some('>');
        if append {
            self.pos += 1;
        }
        self.skip_whitespace();
        let kind = if self.peek_char() == Some('&') {
            self.pos += 1;
            let source = self
                .read_char()
                .and_then(|c| c.to_digit(10))
                .ok_or(LexingError::Incomplete)?;
            RedirectKind::Clone(source)
        } else {
            let target = self.read_target();
            if target.is_empty() {
                return Err(LexingError::Incomplete);
            }
            match (input, append) {
                (true, _) => RedirectKind::Input(target),
                (false, true) => RedirectKind::Append(target),
                (false, false) => RedirectKind::Output(target),
            }
        };
        self.redirects.push(Redirection { fd, kind });
        if self.buffer.is_empty() || self.buffer.ends_with([' ', '\t']) {
            self.skip_whitespace();
        }
        Ok(())
    }

    fn read_target(&mut self) -> String {
        let mut target = String::new();
        let mut quoted = false;
        while let Some(c) = self.peek_char() {
            if quoted {
                target.push(c);
                quoted = c != '"';
                self.pos += 1;
                continue;
            }
            match c {
                ' ' | '\t' | '&' | '|' | '<' | '>' => break,
                ')' if self.depth > 0 => break,
                '^' => {
                    self.pos += 1;
                    if let Some(escaped) = self.read_char() {
                        target.push(escaped);
                    }
                    continue;
                }
                '"' => quoted = true,
                _ => {}
            }
            target.push(c);
            self.pos += 1;
        }
        target
    }

    fn close_block(&mut self) {
        if self.depth == 0 {
            // A stray `)` where a command should start discards the rest of the line.
            self.pos = self.input.len();
            return;
        }
        self.flush();
        self.tokens.push(Token::Close);
        self.depth -= 1;
        self.state = LexingState::AfterBlock;
    }

    /// Emits the accumulated command text followed by its redirections.
    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim_start();
        if !text.is_empty() {
            self.tokens.push(Token::Command(text.to_string()));
        }
        for redirect in self.redirects.drain(..) {
            self.tokens.push(Token::Redirect(redirect));
        }
    }

    fn end_of_line(&mut self) -> Result<LineStatus, LexingError> {
        match self.state {
            LexingState::ForSet => {
                self.set.push(' ');
                Ok(LineStatus::NeedMore)
            }
            LexingState::ForIn | LexingState::ForOpen | LexingState::ForDo => Err(LexingError::Incomplete),
            _ => {
                self.flush();
                self.state = LexingState::CommandStart;
                if self.depth > 0 {
                    self.tokens.push(Token::Eol);
                    Ok(LineStatus::NeedMore)
                } else {
                    Ok(LineStatus::Complete)
                }
            }
        }
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokenizes input made of one or more physical lines.
pub fn split_into_tokens(text: &str) -> Result<Vec<Token>, LexingError> {
    let mut lexer = Lexer::new();
    for line in text.lines() {
        lexer.push_line(line)?;
    }
    lexer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(s: &str) -> Token {
        Token::Command(s.to_string())
    }

    fn out(fd: u32, target: &str) -> Token {
        Token::Redirect(Redirection {
            fd,
            kind: RedirectKind::Output(target.to_string()),
        })
    }

    #[test]
    fn splits_operators() {
        let tokens = split_into_tokens("echo A && echo B || echo C & dir | more").unwrap();
        assert_eq!(
            tokens,
            vec![
                cmd("echo A "),
                Token::And,
                cmd("echo B "),
                Token::Or,
                cmd("echo C "),
                Token::Concat,
                cmd("dir "),
                Token::Pipe,
                cmd("more"),
            ]
        );
    }

    #[test]
    fn quotes_and_carets_protect_operators() {
        let tokens = split_into_tokens(r#"echo "a & b" ^& c^|d"#).unwrap();
        assert_eq!(tokens, vec![cmd(r#"echo "a & b" & c|d"#)]);
    }

    #[test]
    fn redirections_follow_command() {
        let tokens = split_into_tokens("echo hi >out.txt 2>&1 <in").unwrap();
        assert_eq!(
            tokens,
            vec![
                cmd("echo hi "),
                out(1, "out.txt"),
                Token::Redirect(Redirection {
                    fd: 2,
                    kind: RedirectKind::Clone(1)
                }),
                Token::Redirect(Redirection {
                    fd: 0,
                    kind: RedirectKind::Input("in".into())
                }),
            ]
        );
    }

    #[test]
    fn digit_inside_word_is_not_a_handle() {
        let tokens = split_into_tokens("echo a2>x").unwrap();
        assert_eq!(tokens, vec![cmd("echo a2"), out(1, "x")]);
    }

    #[test]
    fn redirection_without_target_is_an_error() {
        assert_eq!(split_into_tokens("echo >"), Err(LexingError::Incomplete));
    }

    #[test]
    fn multi_line_block_needs_more_input() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.push_line("if exist x (").unwrap(), LineStatus::NeedMore);
        assert_eq!(lexer.push_line("  echo yes").unwrap(), LineStatus::NeedMore);
        assert_eq!(lexer.push_line(") else echo no").unwrap(), LineStatus::Complete);
        assert_eq!(
            lexer.finish().unwrap(),
            vec![
                Token::If,
                cmd("exist x"),
                Token::Open,
                Token::Eol,
                cmd("echo yes"),
                Token::Eol,
                Token::Close,
                Token::Else,
                cmd("echo no"),
            ]
        );
    }

    #[test]
    fn unbalanced_block_at_end_of_input() {
        let mut lexer = Lexer::new();
        lexer.push_line("(echo a").unwrap();
        assert_eq!(lexer.finish(), Err(LexingError::UnbalancedParenthesis));
    }

    #[test]
    fn for_statement_tokens() {
        let tokens = split_into_tokens("for /L %i IN (1,1,3) do echo %i").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::For,
                cmd("/L %i"),
                Token::In,
                Token::Open,
                cmd("1,1,3"),
                Token::Close,
                Token::Do,
                cmd("echo %i"),
            ]
        );
    }

    #[test]
    fn for_set_may_span_lines() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.push_line("for %f in (a").unwrap(), LineStatus::NeedMore);
        assert_eq!(lexer.push_line("b) do echo %f").unwrap(), LineStatus::Complete);
        let tokens = lexer.finish().unwrap();
        assert_eq!(tokens[4], cmd("a b"));
    }

    #[test]
    fn rem_and_labels_are_opaque() {
        assert_eq!(split_into_tokens("rem a & b | c").unwrap(), vec![cmd("rem a & b | c")]);
        assert_eq!(split_into_tokens(":loop & x").unwrap(), vec![cmd(":loop & x")]);
        assert_eq!(split_into_tokens("@remark").unwrap(), vec![cmd("remark")]);
    }

    #[test]
    fn caret_at_end_continues_and_escapes_next_char() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.push_line("echo a^").unwrap(), LineStatus::NeedMore);
        assert_eq!(lexer.push_line("").unwrap(), LineStatus::NeedMore);
        assert_eq!(lexer.push_line("&b").unwrap(), LineStatus::Complete);
        assert_eq!(lexer.finish().unwrap(), vec![cmd("echo a&b")]);
    }

    #[test]
    fn stray_close_paren_drops_rest_of_line() {
        assert_eq!(split_into_tokens(") echo hidden").unwrap(), vec![]);
        assert_eq!(split_into_tokens("echo (x)").unwrap(), vec![cmd("echo (x)")]);
    }

    #[test]
    fn redirections_around_blocks() {
        let tokens = split_into_tokens(">log (echo a) 2>nul").unwrap();
        assert_eq!(
            tokens,
            vec![
                out(1, "log"),
                Token::Open,
                cmd("echo a"),
                Token::Close,
                out(2, "nul"),
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive_only_at_command_start() {
        let tokens = split_into_tokens("IF 1==1 echo if").unwrap();
        assert_eq!(tokens, vec![Token::If, cmd("1==1"), cmd("echo if")]);
        assert_eq!(split_into_tokens("iffy").unwrap(), vec![cmd("iffy")]);
    }
}
