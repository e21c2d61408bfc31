//! Sandboxed condition expressions
//!
//! Conditions come from authored playbooks, which may be imported from
//! untrusted sources, so they are parsed by a small recursive-descent grammar
//! instead of being handed to any evaluator with access to program state:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := relational ( ( "==" | "!=" | "===" | "!==" ) relational )*
//! relational := unary ( ( "<" | "<=" | ">" | ">=" ) unary )*
//! unary      := "!" unary | primary
//! primary    := number | string | true | false | null | undefined
//!             | "{{" path "}}" | path | "(" or ")"
//! ```
//!
//! Operators follow loose scripting semantics: `==` coerces between numbers,
//! numeric strings and booleans, `&&`/`||` yield one of their operands, and
//! missing variables read as `undefined`. There are no calls, assignments,
//! indexing or arithmetic, so an expression can only read variables.

use serde_json::Value;
use thiserror::Error;

use crate::interpolator::{interpolate, lookup};
use crate::types::Variables;

const MAX_LENGTH: usize = 4096;
const MAX_DEPTH: usize = 64;

/// Path segments that would reach object internals in a scripting runtime.
const FORBIDDEN_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Root names of ambient runtime objects. Never resolved, even when a
/// variable of the same name exists.
const FORBIDDEN_ROOTS: [&str; 14] = [
    "process",
    "global",
    "globalThis",
    "window",
    "document",
    "require",
    "module",
    "exports",
    "eval",
    "Function",
    "this",
    "import",
    "self",
    "new",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("empty expression")]
    Empty,

    #[error("expression longer than {} characters", MAX_LENGTH)]
    TooLong,

    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("malformed placeholder at offset {0}")]
    BadPlaceholder(usize),

    #[error("forbidden identifier: {0}")]
    Forbidden(String),

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

/// Value domain of the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Arrays and objects
    Composite(Value),
}

impl Operand {
    fn from_json(value: Option<&Value>) -> Self {
        match value {
            None => Operand::Undefined,
            Some(Value::Null) => Operand::Null,
            Some(Value::Bool(flag)) => Operand::Bool(*flag),
            Some(Value::Number(number)) => Operand::Number(number.as_f64().unwrap_or(f64::NAN)),
            Some(Value::String(text)) => Operand::Str(text.clone()),
            Some(other) => Operand::Composite(other.clone()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Operand::Undefined | Operand::Null => false,
            Operand::Bool(flag) => *flag,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::Str(text) => !text.is_empty(),
            Operand::Composite(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Operand::Undefined | Operand::Composite(_) => f64::NAN,
            Operand::Null => 0.0,
            Operand::Bool(flag) => {
                if *flag {
                    1.0
                } else {
                    0.0
                }
            }
            Operand::Number(n) => *n,
            Operand::Str(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
        }
    }

    fn strict_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Undefined, Operand::Undefined) | (Operand::Null, Operand::Null) => true,
            (Operand::Bool(a), Operand::Bool(b)) => a == b,
            (Operand::Number(a), Operand::Number(b)) => a == b,
            (Operand::Str(a), Operand::Str(b)) => a == b,
            (Operand::Composite(a), Operand::Composite(b)) => a == b,
            _ => false,
        }
    }

    fn loose_eq(&self, other: &Operand) -> bool {
        use Operand::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Bool(_), _) => Number(self.to_number()).loose_eq(other),
            (_, Bool(_)) => self.loose_eq(&Number(other.to_number())),
            (Number(a), Str(_)) => *a == other.to_number(),
            (Str(_), Number(b)) => self.to_number() == *b,
            _ => self.strict_eq(other),
        }
    }

    fn compare(&self, other: &Operand, op: &Token) -> bool {
        if let (Operand::Str(a), Operand::Str(b)) = (self, other) {
            return match op {
                Token::Lt => a < b,
                Token::Le => a <= b,
                Token::Gt => a > b,
                Token::Ge => a >= b,
                _ => false,
            };
        }
        let (a, b) = (self.to_number(), other.to_number());
        if a.is_nan() || b.is_nan() {
            return false;
        }
        match op {
            Token::Lt => a < b,
            Token::Le => a <= b,
            Token::Gt => a > b,
            Token::Ge => a >= b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Undefined,
    /// `{{path}}` placeholder
    Placeholder(String),
    /// Bare identifier path
    Path(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => n.to_string(),
        Token::Str(text) => format!("'{}'", text),
        Token::Placeholder(path) => format!("{{{{{}}}}}", path),
        Token::Path(path) => path.clone(),
        other => format!("{:?}", other),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn check_path(path: &str) -> Result<(), ConditionError> {
    let mut segments = path.split('.');
    if let Some(root) = segments.next() {
        if FORBIDDEN_ROOTS.contains(&root) {
            return Err(ConditionError::Forbidden(path.to_string()));
        }
    }
    if path
        .split('.')
        .any(|segment| segment.is_empty() || FORBIDDEN_SEGMENTS.contains(&segment))
    {
        return Err(ConditionError::Forbidden(path.to_string()));
    }
    Ok(())
}

struct Lexer<'a> {
    chars: Vec<(usize, char)>,
    pos: usize,
    variables: &'a Variables,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, variables: &'a Variables) -> Self {
        Self {
            chars: source.char_indices().collect(),
            pos: 0,
            variables,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(i, _)| *i).unwrap_or(0)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ConditionError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek(0) {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            let token = match c {
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '{' if self.peek(1) == Some('{') => self.placeholder()?,
                '\'' | '"' => self.string(c)?,
                '!' => self.operator(&[("!==", Token::StrictNe), ("!=", Token::Ne), ("!", Token::Not)])?,
                '=' => self.operator(&[("===", Token::StrictEq), ("==", Token::Eq)])?,
                '<' => self.operator(&[("<=", Token::Le), ("<", Token::Lt)])?,
                '>' => self.operator(&[(">=", Token::Ge), (">", Token::Gt)])?,
                '&' => self.operator(&[("&&", Token::And)])?,
                '|' => self.operator(&[("||", Token::Or)])?,
                '-' | '0'..='9' | '.' => self.number()?,
                c if is_ident_start(c) => self.word()?,
                other => return Err(ConditionError::UnexpectedChar(other, self.offset())),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn operator(&mut self, candidates: &[(&str, Token)]) -> Result<Token, ConditionError> {
        for (text, token) in candidates {
            let matches = text
                .chars()
                .enumerate()
                .all(|(i, expected)| self.peek(i) == Some(expected));
            if matches {
                self.pos += text.chars().count();
                return Ok(token.clone());
            }
        }
        let c = self.peek(0).unwrap_or('\0');
        Err(ConditionError::UnexpectedChar(c, self.offset()))
    }

    fn placeholder(&mut self) -> Result<Token, ConditionError> {
        let start = self.offset();
        self.pos += 2;
        let mut path = String::new();
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some('}'), Some('}')) => {
                    self.pos += 2;
                    break;
                }
                (Some(c), _) if is_ident_char(c) || c == '.' => {
                    path.push(c);
                    self.pos += 1;
                }
                _ => return Err(ConditionError::BadPlaceholder(start)),
            }
        }
        if path.is_empty() || !path.chars().next().is_some_and(is_ident_start) {
            return Err(ConditionError::BadPlaceholder(start));
        }
        check_path(&path)?;
        Ok(Token::Placeholder(path))
    }

    fn string(&mut self, quote: char) -> Result<Token, ConditionError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None => return Err(ConditionError::UnterminatedString),
                Some('\\') => {
                    let escaped = self.peek(1).ok_or(ConditionError::UnterminatedString)?;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Token::Str(interpolate(&text, self.variables)))
    }

    fn number(&mut self) -> Result<Token, ConditionError> {
        let start = self.offset();
        let mut text = String::new();
        if self.peek(0) == Some('-') {
            text.push('-');
            self.pos += 1;
        }
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ConditionError::UnexpectedChar(text.chars().next().unwrap_or('-'), start))
    }

    fn word(&mut self) -> Result<Token, ConditionError> {
        let mut word = String::new();
        while let Some(c) = self.peek(0) {
            if is_ident_char(c) || (c == '.' && self.peek(1).is_some_and(is_ident_start)) {
                word.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(match word.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "undefined" => Token::Undefined,
            _ => {
                check_path(&word)?;
                Token::Path(word)
            }
        })
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    variables: &'a Variables,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep);
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = if left.truthy() { left } else { right };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.equality()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.equality()?;
            left = if left.truthy() { right } else { left };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.relational()?;
        while let Some(op) = self
            .peek()
            .filter(|t| matches!(t, Token::Eq | Token::Ne | Token::StrictEq | Token::StrictNe))
            .cloned()
        {
            self.pos += 1;
            let right = self.relational()?;
            left = Operand::Bool(match op {
                Token::Eq => left.loose_eq(&right),
                Token::Ne => !left.loose_eq(&right),
                Token::StrictEq => left.strict_eq(&right),
                _ => !left.strict_eq(&right),
            });
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.unary()?;
        while let Some(op) = self
            .peek()
            .filter(|t| matches!(t, Token::Lt | Token::Le | Token::Gt | Token::Ge))
            .cloned()
        {
            self.pos += 1;
            let right = self.unary()?;
            left = Operand::Bool(left.compare(&right, &op));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Operand, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Operand::Bool(!operand.truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Operand, ConditionError> {
        match self.advance() {
            None => Err(ConditionError::UnexpectedEnd),
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Str(text)) => Ok(Operand::Str(text)),
            Some(Token::True) => Ok(Operand::Bool(true)),
            Some(Token::False) => Ok(Operand::Bool(false)),
            Some(Token::Null) => Ok(Operand::Null),
            Some(Token::Undefined) => Ok(Operand::Undefined),
            Some(Token::Placeholder(path)) | Some(Token::Path(path)) => {
                Ok(Operand::from_json(lookup(self.variables, &path)))
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ConditionError::UnexpectedToken(describe(&other))),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ConditionError::UnexpectedToken(describe(&other))),
        }
    }
}

/// Parses and evaluates `expression` against `variables`.
pub fn evaluate(expression: &str, variables: &Variables) -> Result<Operand, ConditionError> {
    if expression.len() > MAX_LENGTH {
        return Err(ConditionError::TooLong);
    }
    if expression.trim().is_empty() {
        return Err(ConditionError::Empty);
    }
    let tokens = Lexer::new(expression, variables).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        variables,
    };
    let value = parser.or()?;
    match parser.advance() {
        None => Ok(value),
        Some(extra) => Err(ConditionError::UnexpectedToken(describe(&extra))),
    }
}
