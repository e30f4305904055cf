//! Parser for the parameter literals stored in the registry file.
//!
//! Tuning runs write their best parameters as a Python-style literal, e.g.
//! `{'max_depth': 6, 'learning_rate': 0.1, 'bootstrap': True, 'max_features': None}`.
//! This is a small recursive-descent parser for that literal subset. JSON is a
//! subset of what it accepts (`true`/`false`/`null` and double quotes work too).
//! `nan`, `inf` and `-inf` read as non-finite floats. Anything else, such as
//! calls or bare names, is rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part narrow to integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Where and why a literal failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

/// Parse a full literal. Trailing input other than whitespace is an error.
pub fn parse_literal(input: &str) -> Result<ParamValue, LiteralError> {
    let mut parser = Parser { src: input.as_bytes(), text: input, pos: 0, depth: 0 };
    parser.skip_ws();
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Parse a literal that must be a mapping with string keys.
pub fn parse_param_map(input: &str) -> Result<BTreeMap<String, ParamValue>, LiteralError> {
    match parse_literal(input)? {
        ParamValue::Map(map) => Ok(map),
        other => Err(LiteralError {
            offset: 0,
            message: format!("expected a dict literal, found {}", other.type_name()),
        }),
    }
}

const MAX_DEPTH: usize = 32;

struct Parser<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError { offset: self.pos, message: message.into() }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), LiteralError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", byte as char)))
        }
    }

    fn value(&mut self) -> Result<ParamValue, LiteralError> {
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'{') => self.nested(|p| p.map()),
            Some(b'[') => self.nested(|p| p.sequence(b'[', b']')),
            Some(b'(') => self.nested(|p| p.sequence(b'(', b')')),
            Some(b'\'' | b'"') => self.string().map(ParamValue::Str),
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c as char))),
        }
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<ParamValue, LiteralError>,
    ) -> Result<ParamValue, LiteralError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn map(&mut self) -> Result<ParamValue, LiteralError> {
        self.expect(b'{')?;
        let mut map = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(ParamValue::Map(map));
            }
            let key_at = self.pos;
            let key = match self.value()? {
                ParamValue::Str(s) => s,
                ParamValue::Int(i) => i.to_string(),
                other => {
                    return Err(LiteralError {
                        offset: key_at,
                        message: format!("unsupported dict key of type {}", other.type_name()),
                    })
                }
            };
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let value = self.value()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(LiteralError {
                    offset: key_at,
                    message: format!("duplicate key '{key}'"),
                });
            }
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: u8, close: u8) -> Result<ParamValue, LiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(ParamValue::List(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error(format!("expected ',' or '{}'", close as char))),
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        self.pos += 1;
        let text = self.text;
        let mut out = String::new();
        loop {
            let rest = &text[self.pos..];
            let mut chars = rest.chars();
            let c = chars.next().ok_or_else(|| self.error("unterminated string"))?;
            self.pos += c.len_utf8();
            match c {
                '\\' => {
                    let esc = chars.next().ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += esc.len_utf8();
                    match esc {
                        '\\' => out.push('\\'),
                        '\'' => out.push('\''),
                        '"' => out.push('"'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        other => {
                            // unknown escapes are kept verbatim, as Python does
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                '\n' => return Err(self.error("newline in string")),
                c if c as u32 == quote as u32 => return Ok(out),
                c => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
        let end = self.pos + digits;
        let hex = self
            .text
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("escape is not a valid character"))
    }

    fn number(&mut self) -> Result<ParamValue, LiteralError> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            return match self.keyword()? {
                ParamValue::Float(v) if negative => Ok(ParamValue::Float(-v)),
                v @ ParamValue::Float(_) => Ok(v),
                _ => Err(LiteralError { offset: start, message: "sign before a name".into() }),
            };
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => self.pos += 1,
                b'.' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'-' | b'+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let raw: String = self.text[start..self.pos].chars().filter(|c| *c != '_').collect();
        let bad = || LiteralError { offset: start, message: format!("invalid number '{raw}'") };
        if is_float {
            let v: f64 = raw.parse().map_err(|_| bad())?;
            if !v.is_finite() {
                return Err(bad());
            }
            Ok(ParamValue::Float(v))
        } else {
            raw.parse::<i64>().map(ParamValue::Int).map_err(|_| bad())
        }
    }

    fn keyword(&mut self) -> Result<ParamValue, LiteralError> {
        let start = self.pos;
        let is_name_byte = |c: u8| c.is_ascii_alphanumeric() || c == b'_' || c == b'.';
        while self.peek().is_some_and(is_name_byte) {
            self.pos += 1;
        }
        match &self.text[start..self.pos] {
            "True" | "true" => Ok(ParamValue::Bool(true)),
            "False" | "false" => Ok(ParamValue::Bool(false)),
            "None" | "null" => Ok(ParamValue::None),
            // tuning runs write non-finite scores as bare names
            "nan" | "NaN" => Ok(ParamValue::Float(f64::NAN)),
            "inf" | "Infinity" => Ok(ParamValue::Float(f64::INFINITY)),
            word => Err(LiteralError {
                offset: start,
                message: format!("unsupported name '{word}'"),
            }),
        }
    }
}
