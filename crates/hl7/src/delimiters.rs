//! Delimiter declaration carried in-band by the header segment.
//!
//! Every HL7 v2 message declares its own delimiters immediately after the header name:
//! `MSH|^~\&` declares field `|`, component `^`, repetition `~`, escape `\` and
//! sub-component `&`. The header name must be one of [`HEADER_NAMES`].

use crate::{Hl7Error, Hl7Result};

/// Segment names that carry a delimiter declaration.
pub const HEADER_NAMES: [&str; 3] = ["MSH", "FHS", "BHS"];

/// Segment terminators recognised by the tokenizer.
pub const SEGMENT_TERMINATORS: [char; 2] = ['\r', '\n'];

/// The five delimiter classes of an HL7 v2 message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// Reads the delimiter declaration positionally from the start of a message.
    ///
    /// The first three characters must be a header name, followed by the field delimiter
    /// and the four encoding characters (component, repetition, escape, sub-component).
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::MalformedInput`] if the header name is not recognised, the
    /// declaration is truncated, or two delimiter classes share a character.
    pub fn from_header(text: &str) -> Hl7Result<Self> {
        let chars: Vec<char> = text.chars().take(8).collect();
        let name: String = chars.iter().take(3).collect();

        if !HEADER_NAMES.contains(&name.as_str()) {
            return Err(Hl7Error::MalformedInput(format!(
                "message must start with one of {:?}, got '{}'",
                HEADER_NAMES, name
            )));
        }

        if chars.len() < 8 {
            return Err(Hl7Error::MalformedInput(
                "header delimiter declaration is truncated".into(),
            ));
        }

        let delimiters = Self {
            field: chars[3],
            component: chars[4],
            repetition: chars[5],
            escape: chars[6],
            subcomponent: chars[7],
        };
        delimiters.validate()?;
        Ok(delimiters)
    }

    /// The four encoding characters as they appear in the header's second field.
    pub fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }

    /// Returns true if `c` is any of the five delimiters.
    pub fn is_delimiter(&self, c: char) -> bool {
        self.as_array().contains(&c)
    }

    fn as_array(&self) -> [char; 5] {
        [
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ]
    }

    fn validate(&self) -> Hl7Result<()> {
        let all = self.as_array();
        for (i, c) in all.iter().enumerate() {
            if SEGMENT_TERMINATORS.contains(c) || c.is_alphanumeric() {
                return Err(Hl7Error::MalformedInput(format!(
                    "invalid delimiter character {:?} in header declaration",
                    c
                )));
            }
            if all[i + 1..].contains(c) {
                return Err(Hl7Error::MalformedInput(format!(
                    "delimiter {:?} is declared more than once",
                    c
                )));
            }
        }
        Ok(())
    }
}
