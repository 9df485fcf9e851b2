//! Restricted expression grammar shared by formulas and condition predicates.
//!
//! Formulas accept numeric literals, variable names, `+ - * /`, unary minus and parentheses.
//! Predicates additionally accept string and boolean literals, the comparisons
//! `< <= > >= == !=` and the combinators `&& ||`. There are no function calls, member access or
//! string concatenation; anything outside the grammar is rejected at parse time.
//!
//! ```text
//! or       := and ("||" and)*
//! and      := compare ("&&" compare)*
//! compare  := additive (("<" | "<=" | ">" | ">=" | "==" | "!=") additive)?
//! additive := term (("+" | "-") term)*
//! term     := unary (("*" | "/") unary)*
//! unary    := ("-" | "+") unary | primary
//! primary  := number | string | "true" | "false" | identifier | "(" or ")"
//! ```

use crate::errors::EngineError;

/// Deepest allowed run of parentheses and unary signs.
pub const MAX_NESTING: usize = 64;
/// Longest allowed expression, in tokens. Bounds the height of left-leaning operator chains.
pub const MAX_TOKENS: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Subtract | Self::Multiply | Self::Divide)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Variable(String),
    Negate(Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grammar {
    Arithmetic,
    Predicate,
}

/// A parsed expression together with its source text.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str, grammar: Grammar) -> Result<Self, EngineError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { source, tokens, cursor: 0, depth: 0, grammar };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error_at(token.position, "unexpected trailing input"));
        }
        Ok(Self { source: source.to_string(), root })
    }

    pub fn formula(source: &str) -> Result<Self, EngineError> {
        Self::parse(source, Grammar::Arithmetic)
    }

    pub fn predicate(source: &str) -> Result<Self, EngineError> {
        Self::parse(source, Grammar::Predicate)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Variable names in order of first appearance, without duplicates.
    ///
    /// Names are whole identifier tokens, so `users` never matches inside `users_total`.
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_references(&self.root, &mut names);
        names
    }
}

fn collect_references<'e>(expr: &'e Expr, names: &mut Vec<&'e str>) {
    match expr {
        Expr::Variable(name) => {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        Expr::Negate(inner) => collect_references(inner, names),
        Expr::Binary { left, right, .. } => {
            collect_references(left, names);
            collect_references(right, names);
        }
        Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) => {}
    }
}

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
    Number(f64),
    Text(String),
    Identifier(String),
    Operator(BinaryOp),
    OpenParen,
    CloseParen,
}

#[derive(Clone, Debug, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn syntax_error(source: &str, position: usize, message: impl Into<String>) -> EngineError {
    EngineError::InvalidExpressionSyntax {
        expression: source.to_string(),
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(position, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let starts_number = ch.is_ascii_digit()
            || (ch == '.' && source[position + 1..].starts_with(|next: char| next.is_ascii_digit()));
        if starts_number {
            let mut end = position;
            let mut seen_dot = false;
            while let Some(&(index, next)) = chars.peek() {
                if next.is_ascii_digit() {
                    end = index + 1;
                } else if next == '.' && !seen_dot {
                    seen_dot = true;
                    end = index + 1;
                } else {
                    break;
                }
                chars.next();
            }
            let literal = &source[position..end];
            let value = literal
                .parse::<f64>()
                .map_err(|_| syntax_error(source, position, format!("invalid number `{literal}`")))?;
            push_token(source, &mut tokens, Token { kind: TokenKind::Number(value), position })?;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut end = position;
            while let Some(&(index, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            push_token(
                source,
                &mut tokens,
                Token { kind: TokenKind::Identifier(source[position..end].to_string()), position },
            )?;
            continue;
        }

        if ch == '\'' || ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            for (_, next) in chars.by_ref() {
                if next == ch {
                    closed = true;
                    break;
                }
                text.push(next);
            }
            if !closed {
                return Err(syntax_error(source, position, "unterminated string literal"));
            }
            push_token(source, &mut tokens, Token { kind: TokenKind::Text(text), position })?;
            continue;
        }

        chars.next();
        let follower = chars.peek().map(|&(_, next)| next);
        let (kind, paired) = match (ch, follower) {
            ('(', _) => (TokenKind::OpenParen, false),
            (')', _) => (TokenKind::CloseParen, false),
            ('+', _) => (TokenKind::Operator(BinaryOp::Add), false),
            ('-', _) => (TokenKind::Operator(BinaryOp::Subtract), false),
            ('*', _) => (TokenKind::Operator(BinaryOp::Multiply), false),
            ('/', _) => (TokenKind::Operator(BinaryOp::Divide), false),
            ('<', Some('=')) => (TokenKind::Operator(BinaryOp::LessOrEqual), true),
            ('<', _) => (TokenKind::Operator(BinaryOp::Less), false),
            ('>', Some('=')) => (TokenKind::Operator(BinaryOp::GreaterOrEqual), true),
            ('>', _) => (TokenKind::Operator(BinaryOp::Greater), false),
            ('=', Some('=')) => (TokenKind::Operator(BinaryOp::Equal), true),
            ('!', Some('=')) => (TokenKind::Operator(BinaryOp::NotEqual), true),
            ('&', Some('&')) => (TokenKind::Operator(BinaryOp::And), true),
            ('|', Some('|')) => (TokenKind::Operator(BinaryOp::Or), true),
            (other, _) => {
                return Err(syntax_error(source, position, format!("unexpected character `{other}`")))
            }
        };
        if paired {
            chars.next();
        }
        push_token(source, &mut tokens, Token { kind, position })?;
    }

    Ok(tokens)
}

fn push_token(source: &str, tokens: &mut Vec<Token>, token: Token) -> Result<(), EngineError> {
    if tokens.len() >= MAX_TOKENS {
        return Err(syntax_error(
            source,
            token.position,
            format!("expression is too long (more than {MAX_TOKENS} tokens)"),
        ));
    }
    tokens.push(token);
    Ok(())
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
    grammar: Grammar,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_operator(&self) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token { kind: TokenKind::Operator(op), .. }) => Some(*op),
            _ => None,
        }
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> EngineError {
        syntax_error(self.source, position, message)
    }

    fn end_position(&self) -> usize {
        self.source.len()
    }

    fn descend(&mut self, position: usize) -> Result<(), EngineError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_at(
                position,
                format!("expression nests too deeply (limit {MAX_NESTING})"),
            ));
        }
        Ok(())
    }

    /// Consumes the next operator when it is one of `accepted`. Operators outside the active
    /// grammar are rejected here rather than left for the trailing-input check.
    fn next_operator(&mut self, accepted: &[BinaryOp]) -> Result<Option<BinaryOp>, EngineError> {
        let Some(op) = self.peek_operator() else {
            return Ok(None);
        };
        if !accepted.contains(&op) {
            return Ok(None);
        }
        if self.grammar == Grammar::Arithmetic && !op.is_arithmetic() {
            let position = self.peek().map(|token| token.position).unwrap_or_default();
            return Err(self.error_at(
                position,
                format!("operator `{}` is not allowed in a formula", op.symbol()),
            ));
        }
        self.cursor += 1;
        Ok(Some(op))
    }

    fn parse_or(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_and()?;
        while let Some(op) = self.next_operator(&[BinaryOp::Or])? {
            let right = self.parse_and()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_compare()?;
        while let Some(op) = self.next_operator(&[BinaryOp::And])? {
            let right = self.parse_compare()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr, EngineError> {
        const COMPARISONS: [BinaryOp; 6] = [
            BinaryOp::Less,
            BinaryOp::LessOrEqual,
            BinaryOp::Greater,
            BinaryOp::GreaterOrEqual,
            BinaryOp::Equal,
            BinaryOp::NotEqual,
        ];

        let left = self.parse_additive()?;
        let Some(op) = self.next_operator(&COMPARISONS)? else {
            return Ok(left);
        };
        let right = self.parse_additive()?;
        if let Some(chained) = self.peek_operator().filter(|next| COMPARISONS.contains(next)) {
            let position = self.peek().map(|token| token.position).unwrap_or_default();
            return Err(self.error_at(
                position,
                format!("comparisons cannot be chained; parenthesize before `{}`", chained.symbol()),
            ));
        }
        Ok(Expr::Binary { op, left: Box::new(left), right: Box::new(right) })
    }

    fn parse_additive(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_term()?;
        while let Some(op) = self.next_operator(&[BinaryOp::Add, BinaryOp::Subtract])? {
            let right = self.parse_term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.next_operator(&[BinaryOp::Multiply, BinaryOp::Divide])? {
            let right = self.parse_unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EngineError> {
        let Some(op @ (BinaryOp::Subtract | BinaryOp::Add)) = self.peek_operator() else {
            return self.parse_primary();
        };
        let position = self.peek().map(|token| token.position).unwrap_or_default();
        self.cursor += 1;
        self.descend(position)?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(match op {
            BinaryOp::Subtract => Expr::Negate(Box::new(operand)),
            _ => operand,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        let Some(token) = self.tokens.get(self.cursor).cloned() else {
            return Err(self.error_at(self.end_position(), "unexpected end of expression"));
        };
        self.cursor += 1;

        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Identifier(name) => match (name.as_str(), self.grammar) {
                ("true" | "false", Grammar::Predicate) => Ok(Expr::Bool(name == "true")),
                ("true" | "false", Grammar::Arithmetic) => Err(self.error_at(
                    token.position,
                    "boolean literals are not allowed in a formula",
                )),
                _ => {
                    if matches!(self.peek(), Some(Token { kind: TokenKind::OpenParen, .. })) {
                        return Err(self.error_at(
                            token.position,
                            format!("function calls are not supported (`{name}(...)`)"),
                        ));
                    }
                    Ok(Expr::Variable(name))
                }
            },
            TokenKind::Text(text) => match self.grammar {
                Grammar::Predicate => Ok(Expr::Text(text)),
                Grammar::Arithmetic => Err(self.error_at(
                    token.position,
                    "string literals are not allowed in a formula",
                )),
            },
            TokenKind::OpenParen => {
                self.descend(token.position)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.peek() {
                    Some(Token { kind: TokenKind::CloseParen, .. }) => {
                        self.cursor += 1;
                        Ok(inner)
                    }
                    Some(other) => Err(self.error_at(other.position, "expected `)`")),
                    None => Err(self.error_at(self.end_position(), "missing closing `)`")),
                }
            }
            TokenKind::CloseParen => Err(self.error_at(token.position, "unexpected `)`")),
            TokenKind::Operator(op) => Err(self.error_at(
                token.position,
                format!("operator `{}` is missing its left operand", op.symbol()),
            )),
        }
    }
}
