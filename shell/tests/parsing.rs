use cmd_shell::error::{LexingError, ParsingError};
use cmd_shell::lexer::split_into_tokens;
use cmd_shell::parser::{BinaryOp, Node, NodeKind, construct_tree};
use rstest::rstest;

fn parse(text: &str) -> Node {
    construct_tree(split_into_tokens(text).unwrap()).unwrap().unwrap()
}

fn root_op(node: &Node) -> Option<BinaryOp> {
    match &node.kind {
        NodeKind::Binary { op, .. } => Some(*op),
        _ => None,
    }
}

#[rstest]
#[case("a & b && c", BinaryOp::Concat)]
#[case("a && b & c", BinaryOp::Concat)]
#[case("a && b || c", BinaryOp::OnFailure)]
#[case("a || b && c", BinaryOp::OnFailure)]
#[case("a | b && c", BinaryOp::OnSuccess)]
#[case("a && b | c", BinaryOp::OnSuccess)]
#[case("a | b | c", BinaryOp::Pipe)]
fn loosest_operator_is_the_root(#[case] line: &str, #[case] expected: BinaryOp) {
    assert_eq!(root_op(&parse(line)), Some(expected));
}

#[test]
fn equal_operators_group_left() {
    assert_eq!(
        parse("a | b | c"),
        Node::binary(
            BinaryOp::Pipe,
            Node::binary(BinaryOp::Pipe, Node::single("a "), Node::single("b ")),
            Node::single("c"),
        )
    );
}

#[test]
fn block_lines_are_sequenced() {
    let node = parse("(echo a\necho b)");
    let NodeKind::Block(inner) = node.kind else {
        panic!("expected a block, got {node:?}");
    };
    assert_eq!(root_op(&inner), Some(BinaryOp::Concat));
}

#[test]
fn redirections_attach_to_their_command() {
    let node = parse("echo a >out.txt & echo b");
    let NodeKind::Binary { left, right, .. } = node.kind else {
        panic!("expected a sequence");
    };
    assert_eq!(left.redirects.len(), 1);
    assert!(right.redirects.is_empty());
}

#[test]
fn empty_line_has_no_tree() {
    assert_eq!(construct_tree(split_into_tokens("   ").unwrap()), Ok(None));
}

#[rstest]
#[case("(echo a", LexingError::UnbalancedParenthesis)]
#[case("echo >", LexingError::Incomplete)]
fn lexing_errors(#[case] line: &str, #[case] expected: LexingError) {
    assert_eq!(split_into_tokens(line), Err(expected));
}

#[test]
fn operator_without_left_side() {
    assert_eq!(
        construct_tree(split_into_tokens("&& echo").unwrap()),
        Err(ParsingError::UnexpectedToken("&&".into()))
    );
}
