//! JavaScript tokenizer for dependency extraction.
//!
//! Only as much of the language as the extractor needs: identifiers, string
//! literals (escapes decoded), template literals (with `${}` nesting), regular
//! expression literals, numbers, comments, and single-character punctuation.
//! Multi-character operators come out as consecutive punctuation tokens, which
//! is enough to find call expressions and balance brackets.

use std::fmt;

/// Token category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Ident(String),
    /// String literal with escapes decoded
    Str(String),
    /// Template literal; its text is not interpreted
    Template,
    /// Regular expression literal
    Regex,
    /// Numeric literal
    Number,
    /// Single punctuation character
    Punct(char),
}

/// A token with its byte offset and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Category and payload
    pub kind: TokenKind,
    /// Byte offset of the first character in the source
    pub offset: usize,
    /// Line of the first character
    pub line: usize,
}

/// Tokenizer failure, always an unterminated construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// What was left open
    pub message: String,
    /// Line where it started
    pub line: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for LexError {}

// Keywords after which a `/` starts a regex literal rather than a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

// Statement heads whose closing `)` is followed by a statement, so a `/`
// there starts a regex (`if (x) /a/.test(s)`).
const CONTROL_KEYWORDS: &[&str] = &["if", "while", "for", "with"];

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    /// One entry per open `(`: whether it follows a control keyword
    parens: Vec<bool>,
    /// Index of the last `)` that closed a control statement head
    control_close: Option<usize>,
}

/// Tokenize JavaScript source.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().collect(),
        pos: 0,
        line: 1,
        tokens: Vec::new(),
        parens: Vec::new(),
        control_close: None,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer<'_> {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.src.len(), |&(o, _)| o)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, offset: usize, line: usize) {
        self.tokens.push(Token {
            kind,
            offset,
            line,
        });
    }

    fn error(message: &str, line: usize) -> LexError {
        LexError {
            message: message.to_string(),
            line,
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        // Open template literals, each with its `${` brace depth.
        let mut templates: Vec<usize> = Vec::new();

        while let Some(c) = self.peek(0) {
            let offset = self.offset();
            let line = self.line;

            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek(1) == Some('/') => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek(1) == Some('*') => {
                    self.pos += 2;
                    loop {
                        match self.bump() {
                            Some('*') if self.peek(0) == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(Self::error("unterminated comment", line)),
                        }
                    }
                }
                '/' if self.regex_allowed() => {
                    self.regex(line)?;
                    self.push(TokenKind::Regex, offset, line);
                }
                '"' | '\'' => {
                    self.bump();
                    let value = self.string(c, line)?;
                    self.push(TokenKind::Str(value), offset, line);
                }
                '`' => {
                    self.bump();
                    if self.template_chunk(line)? {
                        templates.push(0);
                    } else {
                        self.push(TokenKind::Template, offset, line);
                    }
                }
                '{' if !templates.is_empty() => {
                    if let Some(depth) = templates.last_mut() {
                        *depth += 1;
                    }
                    self.bump();
                    self.push(TokenKind::Punct('{'), offset, line);
                }
                '}' if templates.last() == Some(&0) => {
                    // end of a `${...}` substitution: resume the template text
                    self.bump();
                    if !self.template_chunk(line)? {
                        templates.pop();
                        self.push(TokenKind::Template, offset, line);
                    }
                }
                '}' if !templates.is_empty() => {
                    if let Some(depth) = templates.last_mut() {
                        *depth -= 1;
                    }
                    self.bump();
                    self.push(TokenKind::Punct('}'), offset, line);
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    while let Some(c) = self.peek(0) {
                        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    self.push(TokenKind::Number, offset, line);
                }
                c if is_ident_start(c) => {
                    let start = self.pos;
                    while self.peek(0).is_some_and(is_ident_part) {
                        self.bump();
                    }
                    let name: String =
                        self.chars[start..self.pos].iter().map(|&(_, c)| c).collect();
                    self.push(TokenKind::Ident(name), offset, line);
                }
                c => {
                    self.bump();
                    match c {
                        '(' => {
                            let control = matches!(
                                self.tokens.last().map(|t| &t.kind),
                                Some(TokenKind::Ident(word)) if CONTROL_KEYWORDS.contains(&word.as_str())
                            );
                            self.parens.push(control);
                        }
                        ')' => {
                            if self.parens.pop() == Some(true) {
                                self.control_close = Some(self.tokens.len());
                            }
                        }
                        _ => {}
                    }
                    self.push(TokenKind::Punct(c), offset, line);
                }
            }
        }

        if !templates.is_empty() {
            return Err(Self::error("unterminated template literal", self.line));
        }
        Ok(())
    }

    /// Whether a `/` here starts a regex literal. A `}` always reads as the
    /// end of an expression.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.kind) {
            None => true,
            Some(TokenKind::Punct(')')) => self.control_close == Some(self.tokens.len() - 1),
            Some(TokenKind::Punct(p)) => !matches!(p, ')' | ']' | '}'),
            Some(TokenKind::Ident(word)) => REGEX_PRECEDING_KEYWORDS.contains(&word.as_str()),
            Some(_) => false,
        }
    }

    fn regex(&mut self, line: usize) -> Result<(), LexError> {
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    if self.peek(0).is_none_or(|c| c == '\n') {
                        return Err(Self::error("unterminated regular expression", line));
                    }
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some('\n') | None => {
                    return Err(Self::error("unterminated regular expression", line));
                }
                Some(_) => {}
            }
        }
        while self.peek(0).is_some_and(is_ident_part) {
            self.bump();
        }
        Ok(())
    }

    fn string(&mut self, quote: char, line: usize) -> Result<String, LexError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('b') => value.push('\u{8}'),
                    Some('f') => value.push('\u{c}'),
                    Some('v') => value.push('\u{b}'),
                    Some('0') => value.push('\0'),
                    Some('x') => {
                        let decoded = self.hex_escape(2);
                        value.push(decoded.unwrap_or('x'));
                    }
                    Some('u') => {
                        let decoded = if self.peek(0) == Some('{') {
                            self.braced_unicode_escape()
                        } else {
                            self.hex_escape(4)
                        };
                        value.push(decoded.unwrap_or('u'));
                    }
                    // line continuation
                    Some('\n') => {}
                    Some('\r') => {
                        if self.peek(0) == Some('\n') {
                            self.bump();
                        }
                    }
                    Some(other) => value.push(other),
                    None => return Err(Self::error("unterminated string literal", line)),
                },
                Some('\n') | None => return Err(Self::error("unterminated string literal", line)),
                Some(c) => value.push(c),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Option<char> {
        let text: String = (0..digits).map_while(|i| self.peek(i)).collect();
        if text.len() != digits || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        self.pos += digits;
        u32::from_str_radix(&text, 16).ok().and_then(char::from_u32)
    }

    fn braced_unicode_escape(&mut self) -> Option<char> {
        let close = (1..8).find(|&i| self.peek(i) == Some('}'))?;
        let text: String = (1..close).filter_map(|i| self.peek(i)).collect();
        let decoded = u32::from_str_radix(&text, 16).ok().and_then(char::from_u32)?;
        self.pos += close + 1;
        Some(decoded)
    }

    /// Consume template text up to the closing backtick (returns `false`) or
    /// to a `${` substitution (returns `true`).
    fn template_chunk(&mut self, line: usize) -> Result<bool, LexError> {
        loop {
            match self.bump() {
                Some('`') => return Ok(false),
                Some('\\') => {
                    self.bump();
                }
                Some('$') if self.peek(0) == Some('{') => {
                    self.bump();
                    return Ok(true);
                }
                Some(_) => {}
                None => return Err(Self::error("unterminated template literal", line)),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}
