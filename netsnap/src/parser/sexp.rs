use thiserror::Error;

/// Deepest list nesting accepted. KiCad files stay far below this.
pub const MAX_DEPTH: usize = 512;

/// Tokenizer failure. Every variant carries the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SExpError {
    #[error("unexpected end of input")]
    UnexpectedEof { offset: usize },
    #[error("unexpected character '{found}'")]
    UnexpectedChar { found: char, offset: usize },
    #[error("unterminated string")]
    UnterminatedString { offset: usize },
    #[error("content after the top-level expression")]
    TrailingContent { offset: usize },
    #[error("lists nested deeper than {} levels", MAX_DEPTH)]
    TooDeep { offset: usize },
}

impl SExpError {
    pub fn offset(&self) -> usize {
        match self {
            SExpError::UnexpectedEof { offset }
            | SExpError::UnexpectedChar { offset, .. }
            | SExpError::UnterminatedString { offset }
            | SExpError::TrailingContent { offset }
            | SExpError::TooDeep { offset } => *offset,
        }
    }
}

/// S-expression node. Lists remember the byte offset of their opening paren
/// so structural errors can point back into the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SExp {
    Atom(String),
    List(Vec<SExp>, usize),
}

impl SExp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(items, _) => Some(items),
            _ => None,
        }
    }

    /// Byte offset of a list's opening paren; atoms report 0.
    pub fn offset(&self) -> usize {
        match self {
            SExp::List(_, offset) => *offset,
            SExp::Atom(_) => 0,
        }
    }

    /// The leading atom of a list, e.g. `symbol` in `(symbol ...)`.
    pub fn tag(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(SExp::as_atom)
    }

    /// Atom at `index` of a list.
    pub fn atom_at(&self, index: usize) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.get(index))
            .and_then(SExp::as_atom)
    }

    /// First child list whose tag is `key`.
    pub fn get(&self, key: &str) -> Option<&SExp> {
        self.as_list()?
            .iter()
            .skip(1)
            .find(|item| item.tag() == Some(key))
    }

    /// Every child list whose tag is `key`, in source order.
    pub fn get_all(&self, key: &str) -> Vec<&SExp> {
        match self.as_list() {
            Some(items) => items
                .iter()
                .skip(1)
                .filter(|item| item.tag() == Some(key))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Value of a `(key value ...)` child, e.g. `(lib_id "Device:R")`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|child| child.atom_at(1))
    }

    /// True when a bare atom flag (e.g. `hide`) or a `(flag)` child list is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.as_list().is_some_and(|items| {
            items
                .iter()
                .skip(1)
                .any(|item| item.as_atom() == Some(flag) || item.tag() == Some(flag))
        })
    }
}

pub struct SExpParser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> SExpParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    /// Parse exactly one top-level expression followed only by whitespace.
    pub fn parse(&mut self) -> Result<SExp, SExpError> {
        self.skip_whitespace();
        if self.is_eof() {
            return Err(SExpError::UnexpectedEof { offset: self.pos });
        }
        let root = self.parse_sexp()?;
        self.skip_whitespace();
        if !self.is_eof() {
            return Err(SExpError::TrailingContent { offset: self.pos });
        }
        Ok(root)
    }

    fn parse_sexp(&mut self) -> Result<SExp, SExpError> {
        self.skip_whitespace();

        match self.peek() {
            None => Err(SExpError::UnexpectedEof { offset: self.pos }),
            Some(b'(') => self.parse_list(),
            Some(b')') => Err(SExpError::UnexpectedChar {
                found: ')',
                offset: self.pos,
            }),
            Some(b'"') => self.parse_string(),
            Some(_) => self.parse_symbol(),
        }
    }

    fn parse_list(&mut self) -> Result<SExp, SExpError> {
        let start = self.pos;
        if self.depth >= MAX_DEPTH {
            return Err(SExpError::TooDeep { offset: start });
        }
        self.depth += 1;
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();

            match self.peek() {
                None => return Err(SExpError::UnexpectedEof { offset: self.pos }),
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => items.push(self.parse_sexp()?),
            }
        }

        self.depth -= 1;
        Ok(SExp::List(items, start))
    }

    fn parse_string(&mut self) -> Result<SExp, SExpError> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();

        loop {
            let Some(ch) = self.peek() else {
                return Err(SExpError::UnterminatedString { offset: start });
            };
            self.pos += 1;
            match ch {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(SExpError::UnterminatedString { offset: start });
                    };
                    self.pos += 1;
                    bytes.push(match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        other => other,
                    });
                }
                other => bytes.push(other),
            }
        }

        // Splits only happen on ASCII bytes, so the buffer is still valid UTF-8.
        Ok(SExp::Atom(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn parse_symbol(&mut self) -> Result<SExp, SExpError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_whitespace() || ch == b'(' || ch == b')' || ch == b'"' {
                break;
            }
            self.pos += 1;
        }
        Ok(SExp::Atom(
            String::from_utf8_lossy(&self.input[start..self.pos]).into_owned(),
        ))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|ch| ch.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}

/// 1-based line and column of a byte offset.
pub fn line_column(input: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(input.len());
    let before = &input.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = match before.iter().rposition(|&b| b == b'\n') {
        Some(nl) => offset - nl,
        None => offset + 1,
    };
    (line, column)
}
