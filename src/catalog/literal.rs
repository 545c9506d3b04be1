//! Parsing of Python-literal string lists stored in catalog cells
//!
//! History-file catalogs store the variables of a row as text such as
//! `"['TEMP', 'SALT']"`. Only lists/tuples of quoted strings (and a bare quoted string)
//! are accepted.

use crate::errors::{DiagError, Result};

/// Parse a Python list or tuple of string literals
///
/// # Errors
///
/// Returns [`DiagError::Catalog`] if the text is not a list, tuple or single string of
/// quoted literals.
pub fn parse_string_list(text: &str) -> Result<Vec<String>> {
    let mut parser = Parser {
        chars: text.trim().chars().collect(),
        pos: 0,
        text,
    };
    let values = parser.value()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(values)
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    text: &'a str,
}

impl Parser<'_> {
    fn value(&mut self) -> Result<Vec<String>> {
        self.skip_whitespace();
        match self.peek() {
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'' | '"') => Ok(vec![self.string()?]),
            _ => Err(self.error("expected a list, tuple or string")),
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<String>> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.string()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        self.pos += 1;

        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> DiagError {
        DiagError::Catalog(format!(
            "cannot parse {:?} as a list of strings: {message} at offset {}",
            self.text, self.pos
        ))
    }
}
