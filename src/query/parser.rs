//! Recursive-descent parser for the compact query syntax.

use serde_json::{Map, Value};

use super::{Query, QueryField};
use crate::{Error, Result};

/// Parse a query string into its AST.
pub fn parse(query: &str) -> Result<Query> {
    let mut parser = Parser {
        chars: query.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    parser.expect('{')?;
    let fields = parser.parse_fields('}')?;
    parser.expect('}')?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters after query"));
    }
    if fields.is_empty() {
        return Err(Error::ParseError("query selects nothing".to_string()));
    }
    Ok(Query { fields })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &str) -> Error {
        Error::ParseError(format!("{message} (at offset {})", self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Whitespace and commas are interchangeable separators.
    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace() || c == ',') {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn parse_name(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Parse fields until `terminator` (not consumed).
    fn parse_fields(&mut self, terminator: char) -> Result<Vec<QueryField>> {
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(c) if c == terminator => return Ok(fields),
                Some(_) => fields.push(self.parse_field()?),
                None => return Err(self.error(&format!("expected '{terminator}'"))),
            }
        }
    }

    fn parse_field(&mut self) -> Result<QueryField> {
        let first = self.parse_name()?;
        self.skip_ws();

        let (alias, name) = if self.peek() == Some(':') {
            self.pos += 1;
            (first, self.parse_name()?)
        } else {
            (first.clone(), first)
        };

        self.skip_ws();
        let params = if self.peek() == Some('(') {
            self.parse_params()?
        } else {
            Map::new()
        };

        self.skip_ws();
        let fields = if self.peek() == Some('{') {
            self.pos += 1;
            let nested = self.parse_fields('}')?;
            self.expect('}')?;
            nested
        } else {
            Vec::new()
        };

        Ok(QueryField {
            alias,
            name,
            params,
            fields,
        })
    }

    fn parse_params(&mut self) -> Result<Map<String, Value>> {
        self.expect('(')?;
        let mut params = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.pos += 1;
                return Ok(params);
            }
            let key = self.parse_name()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            params.insert(key, value);
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            Some('"') => {
                let raw = self.scan_string()?;
                serde_json::from_str(&raw).map_err(|e| self.error(&e.to_string()))
            }
            Some('{' | '[') => {
                let raw = self.scan_balanced()?;
                serde_json::from_str(&raw).map_err(|e| self.error(&e.to_string()))
            }
            Some(_) => {
                let start = self.pos;
                while matches!(
                    self.peek(),
                    Some(c) if !c.is_whitespace() && !matches!(c, ',' | ')' | '}')
                ) {
                    self.pos += 1;
                }
                let token: String = self.chars[start..self.pos].iter().collect();
                if token.is_empty() {
                    return Err(self.error("expected a value"));
                }
                // Numbers, booleans and null parse as JSON; anything
                // else is a bare-word string.
                Ok(serde_json::from_str(&token).unwrap_or(Value::String(token)))
            }
            None => Err(self.error("expected a value")),
        }
    }

    /// Consume a quoted string literal, returning it with the quotes.
    fn scan_string(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 2;
                continue;
            }
            self.pos += 1;
            if c == '"' {
                return Ok(self.chars[start..self.pos].iter().collect());
            }
        }
        Err(self.error("unterminated string"))
    }

    /// Consume a balanced `{…}`/`[…]` JSON literal, returning it verbatim.
    fn scan_balanced(&mut self) -> Result<String> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.scan_string()?;
                    continue;
                }
                '{' | '[' => depth += 1,
                '}' | ']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return Ok(self.chars[start..self.pos].iter().collect());
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(self.error("unbalanced brackets"))
    }
}
