//! Command tree construction from tokens.
//!
//! Operators bind by precedence, loosest first: `&` (1), `||` (2), `&&` (3), `|` (4).
//! Operators of equal precedence group to the left, so `a & b && c` is
//! `a & (b && c)` and `a | b | c` is `(a | b) | c`. Inside a block a line break
//! acts as `&`.

use crate::condition::IfCondition;
use crate::error::ParsingError;
use crate::for_control::ForControl;
use crate::lexer::Token;
use std::fmt;

/// Kind of redirection, with its target file or source handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<file`
    Input(String),
    /// `>file`, truncating.
    Output(String),
    /// `>>file`
    Append(String),
    /// `>&n`: duplicate handle `n`.
    Clone(u32),
}

/// An I/O redirection of handle `fd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub fd: u32,
    pub kind: RedirectKind,
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RedirectKind::Input(target) => write!(f, "{}<{target}", self.fd),
            RedirectKind::Output(target) => write!(f, "{}>{target}", self.fd),
            RedirectKind::Append(target) => write!(f, "{}>>{target}", self.fd),
            RedirectKind::Clone(source) => write!(f, "{}>&{source}", self.fd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `&` and line breaks inside a block.
    Concat,
    /// `|`
    Pipe,
    /// `&&`
    OnSuccess,
    /// `||`
    OnFailure,
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<(Self, u8)> {
        Some(match token {
            Token::Concat => (BinaryOp::Concat, 1),
            Token::Or => (BinaryOp::OnFailure, 2),
            Token::And => (BinaryOp::OnSuccess, 3),
            Token::Pipe => (BinaryOp::Pipe, 4),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A simple command, unexpanded.
    Single(String),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    If {
        condition: IfCondition,
        then_block: Box<Node>,
        else_block: Option<Box<Node>>,
    },
    For {
        control: ForControl,
        do_block: Box<Node>,
    },
    /// A parenthesised block.
    Block(Box<Node>),
}

/// A node of the command tree with the redirections applied around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub redirects: Vec<Redirection>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            redirects: Vec::new(),
        }
    }

    pub fn single(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Single(text.into()))
    }

    pub fn binary(op: BinaryOp, left: Node, right: Node) -> Self {
        Self::new(NodeKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }
}

struct TreeBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl TreeBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        TreeBuilder { tokens, pos: 0 }
    }

    fn build_tree(mut self) -> Result<Option<Node>, ParsingError> {
        let tree = self.parse_list(false)?;

        // Ensure we consumed all tokens
        if let Some(token) = self.peek() {
            return Err(ParsingError::UnexpectedToken(token.to_string()));
        }

        Ok(tree)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParsingError> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ParsingError::UnexpectedToken(token.to_string())),
            None => Err(ParsingError::UnexpectedEnd),
        }
    }

    /// Statements separated by line breaks: stmt (EOL stmt)*
    fn parse_list(&mut self, in_block: bool) -> Result<Option<Node>, ParsingError> {
        let mut list: Option<Node> = None;
        loop {
            while self.peek() == Some(&Token::Eol) {
                self.consume();
            }
            match self.peek() {
                None if in_block => return Err(ParsingError::UnexpectedEnd),
                None => break,
                Some(Token::Close) if in_block => break,
                _ => {}
            }
            let statement = self.parse_expression(0)?;
            list = Some(match list {
                None => statement,
                Some(previous) => Node::binary(BinaryOp::Concat, previous, statement),
            });
            if !in_block {
                if let Some(token) = self.peek().filter(|t| **t != Token::Eol) {
                    return Err(ParsingError::UnexpectedToken(token.to_string()));
                }
            }
        }
        Ok(list)
    }

    /// Precedence climbing: consumes operators that bind tighter than `floor`.
    fn parse_expression(&mut self, floor: u8) -> Result<Node, ParsingError> {
        let mut left = self.parse_statement()?;
        while let Some((op, precedence)) = self.peek().and_then(BinaryOp::from_token) {
            if precedence <= floor {
                break;
            }
            self.consume();
            // A trailing `&` before the end of a line or block is allowed.
            if op == BinaryOp::Concat && matches!(self.peek(), None | Some(Token::Close | Token::Eol)) {
                break;
            }
            let right = self.parse_expression(precedence)?;
            left = Node::binary(op, left, right);
        }
        Ok(left)
    }

    fn take_redirects(&mut self, redirects: &mut Vec<Redirection>) {
        while let Some(Token::Redirect(_)) = self.peek() {
            if let Some(Token::Redirect(r)) = self.consume() {
                redirects.push(r);
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Node, ParsingError> {
        let mut redirects = Vec::new();
        self.take_redirects(&mut redirects);
        let starts_statement = matches!(
            self.peek(),
            Some(Token::Command(_) | Token::Open | Token::If | Token::For)
        );
        if !starts_statement && !redirects.is_empty() {
            // A statement made only of redirections.
            let mut node = Node::single("");
            node.redirects = redirects;
            return Ok(node);
        }
        let mut node = match self.consume() {
            Some(Token::Command(text)) => Node::single(text),
            Some(Token::Open) => {
                let inner = self.parse_list(true)?;
                let inner = inner.ok_or(ParsingError::UnexpectedToken(")".to_string()))?;
                self.expect(Token::Close)?;
                Node::new(NodeKind::Block(Box::new(inner)))
            }
            Some(Token::If) => return self.parse_if(redirects),
            Some(Token::For) => return self.parse_for(redirects),
            Some(token) => return Err(ParsingError::UnexpectedToken(token.to_string())),
            None => return Err(ParsingError::UnexpectedEnd),
        };
        self.take_redirects(&mut redirects);
        node.redirects = redirects;
        Ok(node)
    }

    fn parse_if(&mut self, redirects: Vec<Redirection>) -> Result<Node, ParsingError> {
        let text = match self.consume() {
            Some(Token::Command(text)) => text,
            Some(token) => return Err(ParsingError::UnexpectedToken(token.to_string())),
            None => return Err(ParsingError::UnexpectedEnd),
        };
        if text.trim() == "/?" {
            return Ok(Node::single("help if"));
        }
        let (condition, _) = IfCondition::parse(&text)?;
        let then_block = self.parse_expression(0)?;
        let else_block = if self.peek() == Some(&Token::Else) {
            self.consume();
            Some(Box::new(self.parse_expression(0)?))
        } else {
            None
        };
        Ok(Node {
            kind: NodeKind::If {
                condition,
                then_block: Box::new(then_block),
                else_block,
            },
            redirects,
        })
    }

    fn parse_for(&mut self, redirects: Vec<Redirection>) -> Result<Node, ParsingError> {
        let header = match self.consume() {
            Some(Token::Command(text)) => text,
            Some(token) => return Err(ParsingError::UnexpectedToken(token.to_string())),
            None => return Err(ParsingError::UnexpectedEnd),
        };
        if header.trim() == "/?" {
            return Ok(Node::single("help for"));
        }
        self.expect(Token::In)?;
        self.expect(Token::Open)?;
        let set = match self.peek() {
            Some(Token::Command(_)) => match self.consume() {
                Some(Token::Command(set)) => set,
                _ => String::new(),
            },
            _ => String::new(),
        };
        self.expect(Token::Close)?;
        self.expect(Token::Do)?;
        let control = ForControl::parse(&header, &set)?;
        let do_block = self.parse_expression(0)?;
        Ok(Node {
            kind: NodeKind::For {
                control,
                do_block: Box::new(do_block),
            },
            redirects,
        })
    }
}

/// Builds the command tree for one logical line; `None` when there is nothing to run.
pub fn construct_tree(tokens: Vec<Token>) -> Result<Option<Node>, ParsingError> {
    TreeBuilder::from(tokens).build_tree()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{CompareOp, Test};
    use crate::lexer::split_into_tokens;

    fn parse(text: &str) -> Node {
        construct_tree(split_into_tokens(text).unwrap()).unwrap().unwrap()
    }

    fn single(text: &str) -> Node {
        Node::single(text)
    }

    fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
        Node::binary(op, left, right)
    }

    #[test]
    fn concat_binds_looser_than_and() {
        assert_eq!(
            parse("a & b && c"),
            binary(
                BinaryOp::Concat,
                single("a "),
                binary(BinaryOp::OnSuccess, single("b "), single("c"))
            )
        );
    }

    #[test]
    fn or_binds_looser_than_and() {
        assert_eq!(
            parse("echo A && echo B || echo C"),
            binary(
                BinaryOp::OnFailure,
                binary(BinaryOp::OnSuccess, single("echo A "), single("echo B ")),
                single("echo C")
            )
        );
    }

    #[test]
    fn pipes_group_left() {
        assert_eq!(
            parse("a | b | c"),
            binary(
                BinaryOp::Pipe,
                binary(BinaryOp::Pipe, single("a "), single("b ")),
                single("c")
            )
        );
    }

    #[test]
    fn trailing_concat_is_tolerated() {
        assert_eq!(parse("echo a &"), single("echo a "));
        assert_eq!(
            construct_tree(split_into_tokens("&& echo").unwrap()),
            Err(ParsingError::UnexpectedToken("&&".into()))
        );
    }

    #[test]
    fn block_lines_become_concat() {
        let tree = parse("(\necho a\necho b\n) >out");
        let NodeKind::Block(inner) = &tree.kind else {
            panic!("expected block, got {tree:?}");
        };
        assert_eq!(**inner, binary(BinaryOp::Concat, single("echo a"), single("echo b")));
        assert_eq!(tree.redirects.len(), 1);
    }

    #[test]
    fn if_else_branches() {
        let tree = parse("if /i %x%==y (echo same) else echo other & echo tail");
        let NodeKind::If {
            condition,
            then_block,
            else_block,
        } = tree.kind
        else {
            panic!("expected if");
        };
        assert!(condition.case_insensitive);
        assert_eq!(
            condition.test,
            Test::Compare {
                op: CompareOp::Equal,
                left: "%x%".into(),
                right: "y".into()
            }
        );
        assert!(matches!(then_block.kind, NodeKind::Block(_)));
        assert_eq!(
            else_block.map(|b| *b),
            Some(binary(BinaryOp::Concat, single("echo other "), single("echo tail")))
        );
    }

    #[test]
    fn for_loop_node() {
        let tree = parse("for %i in (a b) do echo %i");
        let NodeKind::For { control, do_block } = tree.kind else {
            panic!("expected for");
        };
        assert_eq!(control.set, "a b");
        assert_eq!(control.variable_index, 8);
        assert_eq!(*do_block, single("echo %i"));
    }

    #[test]
    fn help_requests_become_commands() {
        assert_eq!(parse("if /?"), single("help if"));
        assert_eq!(parse("for /?"), single("help for"));
    }

    #[test]
    fn redirection_only_statement() {
        let tree = parse(">empty.txt");
        assert_eq!(tree.kind, NodeKind::Single(String::new()));
        assert_eq!(tree.redirects.len(), 1);
    }

    #[test]
    fn empty_input_has_no_tree() {
        assert_eq!(construct_tree(Vec::new()), Ok(None));
    }
}
