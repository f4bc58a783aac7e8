//! Guard conditions and logpoint templates.
//!
//! Conditions are a small boolean language over the variables visible at the
//! breakpoint location: comparisons, `AND`/`OR`/`NOT`, parentheses and
//! `IS [NOT] NULL`. Anything that cannot be evaluated counts as false.

use std::cmp::Ordering;

use logos::Logos;
use smol_str::SmolStr;

use crate::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(SqlValue),
    Variable(SmolStr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Truthy(Operand),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub(crate) fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<SqlValue>) -> bool {
        match self {
            Condition::Compare { left, op, right } => {
                let (Some(left), Some(right)) = (resolve(left, lookup), resolve(right, lookup))
                else {
                    return false;
                };
                let Some(ordering) = left.compare(&right) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                }
            }
            Condition::IsNull { operand, negated } => {
                let is_null = resolve(operand, lookup).is_none_or(|value| value.is_null());
                is_null != *negated
            }
            Condition::Truthy(operand) => match resolve(operand, lookup) {
                Some(SqlValue::Bool(value)) => value,
                Some(SqlValue::Int(value)) => value != 0,
                _ => false,
            },
            Condition::Not(inner) => !inner.evaluate(lookup),
            Condition::And(left, right) => left.evaluate(lookup) && right.evaluate(lookup),
            Condition::Or(left, right) => left.evaluate(lookup) || right.evaluate(lookup),
        }
    }
}

fn resolve(operand: &Operand, lookup: &dyn Fn(&str) -> Option<SqlValue>) -> Option<SqlValue> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::Variable(name) => lookup(name),
    }
}

fn unquote(lex: &mut logos::Lexer<Token>) -> SqlValue {
    let slice = lex.slice();
    SqlValue::Text(slice[1..slice.len() - 1].replace("''", "'"))
}

#[derive(Logos, Debug, Clone, PartialEq)]
enum Token {
    #[regex(r"[ \t\r\n\f]+")]
    Whitespace,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[token("=", |_| CompareOp::Eq)]
    #[token("==", |_| CompareOp::Eq)]
    #[token("!=", |_| CompareOp::NotEq)]
    #[token("<>", |_| CompareOp::NotEq)]
    #[token("<", |_| CompareOp::Lt)]
    #[token("<=", |_| CompareOp::LtEq)]
    #[token(">", |_| CompareOp::Gt)]
    #[token(">=", |_| CompareOp::GtEq)]
    Op(CompareOp),

    #[token("AND", ignore(ascii_case))]
    And,
    #[token("OR", ignore(ascii_case))]
    Or,
    #[token("NOT", ignore(ascii_case))]
    Not,
    #[token("IS", ignore(ascii_case))]
    Is,
    #[token("NULL", ignore(ascii_case))]
    Null,

    #[token("TRUE", |_| SqlValue::Bool(true), ignore(ascii_case))]
    #[token("FALSE", |_| SqlValue::Bool(false), ignore(ascii_case))]
    #[regex(r"'([^']|'')*'", unquote)]
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok().map(SqlValue::Int))]
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok().map(SqlValue::Float))]
    Literal(SqlValue),

    #[regex(r"[\p{L}_$@][\p{L}\p{N}_$@.]*", |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Token::lexer(text);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(Token::Whitespace) => {}
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(format!(
                    "unexpected '{}' at {}",
                    lexer.slice(),
                    lexer.span().start
                ))
            }
        }
    }
    Ok(tokens)
}

/// Deepest run of nested parentheses or `NOT`s a condition may contain.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(format!("condition nests deeper than {MAX_NESTING} levels"));
        }
        Ok(())
    }

    fn parse_not(&mut self) -> Result<Condition, String> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, String> {
        if self.eat(&Token::LParen) {
            self.descend()?;
            let inner = self.parse_or()?;
            if !self.eat(&Token::RParen) {
                return Err("missing ')'".to_string());
            }
            self.depth -= 1;
            return Ok(inner);
        }
        let left = self.parse_operand()?;
        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(Condition::Compare { left, op, right })
            }
            Some(Token::Is) => {
                self.pos += 1;
                let negated = self.eat(&Token::Not);
                if !self.eat(&Token::Null) {
                    return Err("expected NULL after IS".to_string());
                }
                Ok(Condition::IsNull {
                    operand: left,
                    negated,
                })
            }
            _ => Ok(Condition::Truthy(left)),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Variable(name)),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(Token::Null) => Ok(Operand::Literal(SqlValue::Null)),
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of condition".to_string()),
        }
    }
}

/// Parse a guard condition.
pub(crate) fn parse_condition(text: &str) -> Result<Condition, String> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err("empty condition".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let condition = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected trailing token {token:?}"));
    }
    Ok(condition)
}

/// Logpoint message fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogFragment {
    Text(String),
    Variable(SmolStr),
}

/// Split a log message into literal text and `{name}` references.
pub(crate) fn parse_log_message(text: &str) -> Vec<LogFragment> {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open + 1..].find('}') else {
            break;
        };
        let name = rest[open + 1..open + 1 + close].trim();
        literal.push_str(&rest[..open]);
        if name.is_empty() {
            literal.push_str("{}");
        } else {
            if !literal.is_empty() {
                fragments.push(LogFragment::Text(std::mem::take(&mut literal)));
            }
            fragments.push(LogFragment::Variable(SmolStr::new(name)));
        }
        rest = &rest[open + close + 2..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        fragments.push(LogFragment::Text(literal));
    }
    fragments
}

pub(crate) fn format_log_message(
    fragments: &[LogFragment],
    lookup: &dyn Fn(&str) -> Option<SqlValue>,
) -> String {
    let mut output = String::new();
    for fragment in fragments {
        match fragment {
            LogFragment::Text(text) => output.push_str(text),
            LogFragment::Variable(name) => match lookup(name) {
                Some(value) => output.push_str(&value.to_string()),
                None => output.push_str(&format!("<undefined: {name}>")),
            },
        }
    }
    output
}
