//! Delimiter tokenizer.
//!
//! Scans a message left to right and classifies every character against the active
//! delimiters and the two segment terminators (CR, LF). Header segments (`MSH`, `FHS`, `BHS`)
//! yield their encoding characters as a single [`Token::Declaration`] so the declaration is
//! never split or unescaped.

use crate::delimiters::{HEADER_NAMES, SEGMENT_TERMINATORS};
use crate::Delimiters;

/// One lexical unit of an HL7 message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    /// Literal text between delimiters.
    Text(&'a str),
    /// Body of an escape sequence, without the surrounding escape characters.
    Escape(&'a str),
    /// The encoding characters of a header segment.
    Declaration(&'a str),
    Field,
    Component,
    Repetition,
    SubComponent,
    SegmentEnd,
}

/// Iterator over the tokens of one message.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    delimiters: Delimiters,
    at_segment_start: bool,
    pending_declaration: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str, delimiters: Delimiters) -> Self {
        Self {
            input,
            pos: 0,
            delimiters,
            at_segment_start: true,
            pending_declaration: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn classify(&self, c: char) -> Option<Token<'a>> {
        let d = &self.delimiters;
        if SEGMENT_TERMINATORS.contains(&c) {
            Some(Token::SegmentEnd)
        } else if c == d.field {
            Some(Token::Field)
        } else if c == d.component {
            Some(Token::Component)
        } else if c == d.repetition {
            Some(Token::Repetition)
        } else if c == d.subcomponent {
            Some(Token::SubComponent)
        } else {
            None
        }
    }

    /// The declaration runs from just after the header's first field delimiter up to the next
    /// field delimiter or terminator.
    fn take_declaration(&mut self) -> Token<'a> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c == self.delimiters.field || SEGMENT_TERMINATORS.contains(&c))
            .unwrap_or(rest.len());
        self.pos += end;
        Token::Declaration(&rest[..end])
    }

    fn take_escape(&mut self) -> Token<'a> {
        let esc = self.delimiters.escape;
        let rest = self.rest();
        let body = &rest[esc.len_utf8()..];
        let stop = body.find(|c: char| {
            c == esc || SEGMENT_TERMINATORS.contains(&c) || c == self.delimiters.field
        });

        match stop {
            Some(end) if body[end..].starts_with(esc) => {
                self.pos += esc.len_utf8() * 2 + end;
                Token::Escape(&body[..end])
            }
            // Unterminated: the escape character is plain text.
            _ => {
                self.pos += esc.len_utf8();
                Token::Text(&rest[..esc.len_utf8()])
            }
        }
    }

    fn take_text(&mut self) -> Token<'a> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c == self.delimiters.escape || self.classify(c).is_some())
            .unwrap_or(rest.len());
        self.pos += end;
        Token::Text(&rest[..end])
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.pending_declaration {
            self.pending_declaration = false;
            return Some(self.take_declaration());
        }

        let c = self.rest().chars().next()?;

        if self.at_segment_start && !SEGMENT_TERMINATORS.contains(&c) {
            self.at_segment_start = false;
            let rest = self.rest();
            let is_header = HEADER_NAMES.iter().any(|name| {
                rest.starts_with(name) && rest[name.len()..].starts_with(self.delimiters.field)
            });
            if is_header {
                self.pos += 3 + self.delimiters.field.len_utf8();
                self.pending_declaration = true;
                // Emit the name now; the field token is implied by the declaration.
                return Some(Token::Text(&rest[..3]));
            }
        }

        if let Some(token) = self.classify(c) {
            self.pos += c.len_utf8();
            if token == Token::SegmentEnd {
                self.at_segment_start = true;
            }
            return Some(token);
        }

        if c == self.delimiters.escape {
            return Some(self.take_escape());
        }

        Some(self.take_text())
    }
}
