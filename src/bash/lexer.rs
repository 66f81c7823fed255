// src/bash/lexer.rs

//! Shell-word tokenizer for `declare` introspection output
//!
//! Splits bash's `declare -f` / `declare -p` output into words the way a
//! POSIX shell lexer would, with two adjustments needed for this input:
//! `-` counts as a word character (so option flags like `-a` and `-A` stay
//! single tokens) and `$'...'` ANSI-C strings are decoded (bash prints
//! values containing control characters that way). Quoted sections merge
//! with adjacent word characters into a single token; any other character
//! is returned as a one-character token.

use super::BashError;

/// A single token together with the byte span it was read from.
///
/// Spans are what make function-body extraction possible: the body of
/// `name () { ... }` is the raw source text between the spans of the
/// balanced outer braces.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    pushback: Vec<Token>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            pushback: Vec::new(),
        }
    }

    /// Byte offset of the current read position.
    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_ahead(&self) -> Option<char> {
        self.chars.get(self.pos + 1).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Return a token to the stream; it is handed back by the next call
    /// to [`get_token`](Self::get_token).
    pub fn push_token(&mut self, token: Token) {
        self.pushback.push(token);
    }

    /// Read the next token, or `None` at end of input.
    pub fn get_token(&mut self) -> Result<Option<Token>, BashError> {
        if let Some(token) = self.pushback.pop() {
            return Ok(Some(token));
        }

        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }

        if self.peek().is_none() {
            return Ok(None);
        }

        let start = self.offset();
        let mut text = String::new();
        let mut quoted = false;

        while let Some(c) = self.peek() {
            match c {
                '\'' => {
                    quoted = true;
                    self.read_single_quoted(&mut text)?;
                }
                '"' => {
                    quoted = true;
                    self.read_double_quoted(&mut text)?;
                }
                '$' if self.peek_ahead() == Some('\'') => {
                    quoted = true;
                    self.read_ansi_quoted(&mut text)?;
                }
                '\\' => {
                    self.pos += 1;
                    if let Some(escaped) = self.bump() {
                        text.push(escaped);
                    }
                }
                c if is_word_char(c) => {
                    text.push(c);
                    self.pos += 1;
                }
                c if c.is_whitespace() => break,
                c => {
                    // Punctuation: a one-character token on its own, or
                    // the end of the word accumulated so far.
                    if text.is_empty() && !quoted {
                        text.push(c);
                        self.pos += 1;
                    }
                    break;
                }
            }
        }

        let end = self.offset();
        Ok(Some(Token { text, start, end }))
    }

    fn read_single_quoted(&mut self, text: &mut String) -> Result<(), BashError> {
        self.pos += 1;
        loop {
            match self.bump() {
                Some('\'') => return Ok(()),
                Some(c) => text.push(c),
                None => return Err(BashError::UnterminatedQuote),
            }
        }
    }

    fn read_double_quoted(&mut self, text: &mut String) -> Result<(), BashError> {
        self.pos += 1;
        loop {
            match self.bump() {
                Some('"') => return Ok(()),
                Some('\\') => match self.peek() {
                    // Only the quote and the escape character themselves
                    // are unescaped here; other backslash sequences are
                    // kept verbatim and resolved by the caller.
                    Some(c @ ('"' | '\\')) => {
                        text.push(c);
                        self.pos += 1;
                    }
                    Some(_) => text.push('\\'),
                    None => return Err(BashError::UnterminatedQuote),
                },
                Some(c) => text.push(c),
                None => return Err(BashError::UnterminatedQuote),
            }
        }
    }

    fn read_ansi_quoted(&mut self, text: &mut String) -> Result<(), BashError> {
        self.pos += 2; // $'
        loop {
            match self.bump() {
                Some('\'') => return Ok(()),
                Some('\\') => {
                    let escaped = self.bump().ok_or(BashError::UnterminatedQuote)?;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        'a' => text.push('\x07'),
                        'b' => text.push('\x08'),
                        'f' => text.push('\x0c'),
                        'v' => text.push('\x0b'),
                        'e' | 'E' => text.push('\x1b'),
                        '\\' | '\'' | '"' => text.push(escaped),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                Some(c) => text.push(c),
                None => return Err(BashError::UnterminatedQuote),
            }
        }
    }
}
