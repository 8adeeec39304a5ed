//! Bracket-structured syntax tree over the token stream.
//!
//! The tree does not model JavaScript grammar; it nests tokens by `()`, `[]`
//! and `{}` and recognizes call expressions (a dotted identifier path directly
//! followed by an argument list). Arguments and array elements are split on
//! top-level commas into [`Expr`]s, which is all the dependency extractor
//! needs to tell `define(["a", "b"], f)` apart from `x.define = [...]`.

use super::lexer::{Token, TokenKind};
use std::fmt;

/// A sequence of nodes between two top-level commas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr(pub Vec<Node>);

impl Expr {
    /// The string literal this expression consists of, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self.0.as_slice() {
            [Node::Str(value)] => Some(value),
            _ => None,
        }
    }

    /// The array literal this expression consists of, if any.
    pub fn as_array(&self) -> Option<&[Expr]> {
        match self.0.as_slice() {
            [Node::Array(items)] => Some(items),
            _ => None,
        }
    }

    /// Whether the expression has no nodes (`f(a,)` trailing slot).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Identifier or keyword
    Ident(String),
    /// String literal
    Str(String),
    /// Numeric literal
    Number,
    /// Template literal
    Template,
    /// Regular expression literal
    Regex,
    /// `.` member access
    Dot,
    /// Any other punctuation
    Punct(char),
    /// Call expression
    Call(CallExpr),
    /// `[...]` not preceded by a callee (array literal or index)
    Array(Vec<Expr>),
    /// `(...)` not recognized as a call
    Paren(Vec<Expr>),
    /// `{...}`
    Block(Vec<Expr>),
}

/// `callee(args...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    /// Dotted identifier path of the callee (`define`, `dojo.has`); `None` for
    /// computed callees such as `f()()` or `(a || b)(x)`
    pub callee: Option<String>,
    /// Arguments
    pub args: Vec<Expr>,
    /// Line of the opening parenthesis
    pub line: usize,
    /// Byte offset of the opening parenthesis
    pub open_offset: usize,
}

impl CallExpr {
    /// Last segment of the callee path (`dojo.has` → `has`).
    pub fn method(&self) -> Option<&str> {
        self.callee.as_deref().map(|c| c.rsplit('.').next().unwrap_or(c))
    }
}

/// Unbalanced bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Description
    pub message: String,
    /// Line of the offending token
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for ParseError {}

/// Parsed source: top-level statements as one comma-split node list.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    /// Top-level expressions
    pub body: Vec<Expr>,
}

impl SyntaxTree {
    /// Visit every call expression, outer calls before the calls nested in
    /// their arguments, in source order.
    pub fn walk_calls<'a>(&'a self, visitor: &mut dyn FnMut(&'a CallExpr)) {
        for expr in &self.body {
            walk_expr(expr, visitor);
        }
    }
}

fn walk_expr<'a>(expr: &'a Expr, visitor: &mut dyn FnMut(&'a CallExpr)) {
    for node in &expr.0 {
        match node {
            Node::Call(call) => {
                visitor(call);
                call.args.iter().for_each(|arg| walk_expr(arg, visitor));
            }
            Node::Array(items) | Node::Paren(items) | Node::Block(items) => {
                items.iter().for_each(|item| walk_expr(item, visitor));
            }
            _ => {}
        }
    }
}

/// Build the syntax tree for a token stream.
pub fn parse(tokens: &[Token]) -> Result<SyntaxTree, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let body = parser.sequence(None)?;
    Ok(SyntaxTree {
        body,
    })
}

/// Deepest bracket nesting accepted. Both the parser and [`walk_expr`]
/// recurse once per level, so this bounds their stack use.
pub const MAX_NESTING: usize = 512;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

impl Parser<'_> {
    /// Parse nodes until `close` (or end of input when `None`), split on
    /// top-level commas.
    fn sequence(&mut self, close: Option<(char, usize)>) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let tokens = self.tokens;

        while let Some(token) = tokens.get(self.pos) {
            self.pos += 1;
            match &token.kind {
                TokenKind::Punct(c @ (')' | ']' | '}')) => {
                    return match close {
                        Some((expected, _)) if expected == *c => {
                            exprs.push(Expr(current));
                            Ok(exprs)
                        }
                        _ => Err(ParseError {
                            message: format!("unexpected '{c}'"),
                            line: token.line,
                        }),
                    };
                }
                TokenKind::Punct(',') => exprs.push(Expr(std::mem::take(&mut current))),
                TokenKind::Punct(open @ ('(' | '[' | '{')) => {
                    if self.depth >= MAX_NESTING {
                        return Err(ParseError {
                            message: format!("brackets nested deeper than {MAX_NESTING}"),
                            line: token.line,
                        });
                    }
                    self.depth += 1;
                    let inner = self.sequence(Some((closing(*open), token.line)))?;
                    self.depth -= 1;
                    let node = match open {
                        '(' => match take_callee(&mut current) {
                            Some(callee) => Node::Call(CallExpr {
                                callee,
                                args: trim_trailing(inner),
                                line: token.line,
                                open_offset: token.offset,
                            }),
                            None => Node::Paren(inner),
                        },
                        '[' => Node::Array(trim_trailing(inner)),
                        _ => Node::Block(inner),
                    };
                    current.push(node);
                }
                TokenKind::Punct('.') => current.push(Node::Dot),
                TokenKind::Punct(c) => current.push(Node::Punct(*c)),
                TokenKind::Ident(name) => current.push(Node::Ident(name.clone())),
                TokenKind::Str(value) => current.push(Node::Str(value.clone())),
                TokenKind::Number => current.push(Node::Number),
                TokenKind::Template => current.push(Node::Template),
                TokenKind::Regex => current.push(Node::Regex),
            }
        }

        match close {
            Some((expected, line)) => Err(ParseError {
                message: format!("missing '{expected}'"),
                line,
            }),
            None => {
                exprs.push(Expr(current));
                Ok(exprs)
            }
        }
    }
}

/// Drop the empty slot produced by a trailing comma or an empty list.
fn trim_trailing(mut exprs: Vec<Expr>) -> Vec<Expr> {
    if exprs.last().is_some_and(Expr::is_empty) {
        exprs.pop();
    }
    exprs
}

// Keywords that look like callees but are statements (`if (x)`).
const NON_CALLEE_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "with", "return", "typeof", "function", "new",
    "delete", "void", "in", "of", "instanceof",
];

/// Detect the callee preceding a `(`. A trailing `Ident(.Ident)*` chain is
/// removed from `current` and returned as a dotted path; a call, paren or
/// index result stays in place and yields a computed (`None`) callee.
fn take_callee(current: &mut Vec<Node>) -> Option<Option<String>> {
    let mut idx = current.len().checked_sub(1)?;
    let mut segments = match &current[idx] {
        Node::Ident(name) if !NON_CALLEE_KEYWORDS.contains(&name.as_str()) => vec![name.clone()],
        Node::Call(_) | Node::Paren(_) | Node::Array(_) => return Some(None),
        _ => return None,
    };
    while idx >= 2
        && matches!(current[idx - 1], Node::Dot)
        && let Node::Ident(name) = &current[idx - 2]
    {
        segments.push(name.clone());
        idx -= 2;
    }

    // `function name(` declares rather than calls
    if idx >= 1 && matches!(&current[idx - 1], Node::Ident(k) if k == "function") {
        return None;
    }
    // a chain hanging off a computed object (`a().b(`)
    let computed = idx >= 1 && matches!(current[idx - 1], Node::Dot);

    current.truncate(idx);
    segments.reverse();
    Some((!computed).then(|| segments.join(".")))
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn tree(src: &str) -> SyntaxTree {
        parse(&tokenize(src).unwrap()).unwrap()
    }

    fn callees(src: &str) -> Vec<Option<String>> {
        let tree = tree(src);
        let mut found = Vec::new();
        tree.walk_calls(&mut |call| found.push(call.callee.clone()));
        found
    }

    #[test]
    fn test_simple_call() {
        let tree = tree("define(['a', 'b'], function (a, b) {});");
        let mut calls = Vec::new();
        tree.walk_calls(&mut |call| calls.push(call.clone()));
        assert_eq!(calls.len(), 1);
        let args = &calls[0].args;
        assert_eq!(args.len(), 2);
        let deps: Vec<_> = args[0].as_array().unwrap().iter().filter_map(Expr::as_str).collect();
        assert_eq!(deps, vec!["a", "b"]);
    }

    #[test]
    fn test_dotted_and_nested_calls() {
        assert_eq!(
            callees("dojo.has('x') && require(['y'], function(){ has('z'); });"),
            vec![Some("dojo.has".into()), Some("require".into()), Some("has".into())]
        );
    }

    #[test]
    fn test_keywords_and_declarations_are_not_calls() {
        assert_eq!(callees("if (a) { b(); } function define(x) {}"), vec![Some("b".into())]);
    }

    #[test]
    fn test_computed_callee() {
        assert_eq!(callees("f()(1)"), vec![Some("f".into()), None]);
        assert_eq!(callees("a().define([])"), vec![Some("a".into()), None]);
        assert_eq!(callees("(a || b)(x)"), vec![None]);
    }

    #[test]
    fn test_trailing_comma() {
        let tree = tree("define(['a',],)");
        let mut args = 0;
        let mut elems = 0;
        tree.walk_calls(&mut |call| {
            args = call.args.len();
            elems = call.args[0].as_array().map_or(0, <[Expr]>::len);
        });
        assert_eq!((args, elems), (1, 1));
    }

    #[test]
    fn test_unbalanced_brackets() {
        let err = parse(&tokenize("define(['a'], function() {)").unwrap()).unwrap_err();
        assert!(err.message.contains("unexpected"));
        let err = parse(&tokenize("define(['a']").unwrap()).unwrap_err();
        assert!(err.message.contains("missing ')'"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("x = {}0{};", "[".repeat(n), "]".repeat(n));

        let at_limit = tree(&nested(MAX_NESTING));
        let mut calls = 0;
        at_limit.walk_calls(&mut |_| calls += 1);
        assert_eq!(calls, 0);

        let err = parse(&tokenize(&nested(MAX_NESTING + 1)).unwrap()).unwrap_err();
        assert!(err.message.contains("nested deeper"), "{}", err.message);
        assert_eq!(err.line, 1);
    }
}
