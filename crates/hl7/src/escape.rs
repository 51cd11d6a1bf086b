//! Escape sequence handling.
//!
//! Values that contain a delimiter character are carried as escape sequences delimited by the
//! escape character, e.g. `\F\` for the field delimiter. Sequences are resolved at the leaves of
//! the element tree, never inside the header's delimiter declaration.

use crate::Delimiters;

/// Resolves the body of one escape sequence (the text between two escape characters).
///
/// Returns `None` for sequences that have no literal meaning here, in which case the caller
/// keeps the original text.
pub fn decode_sequence(sequence: &str, delimiters: &Delimiters) -> Option<String> {
    match sequence {
        "F" => return Some(delimiters.field.to_string()),
        "S" => return Some(delimiters.component.to_string()),
        "T" => return Some(delimiters.subcomponent.to_string()),
        "R" => return Some(delimiters.repetition.to_string()),
        "E" => return Some(delimiters.escape.to_string()),
        // Highlighting on/off has no textual representation.
        "H" | "N" => return Some(String::new()),
        ".br" => return Some("\n".to_string()),
        _ => {}
    }

    if let Some(hex) = sequence.strip_prefix('X') {
        return decode_hex(hex);
    }

    // Character set switches (\Cxxyy\, \Mxxyyzz\) only change interpretation of the
    // following bytes; the switch itself is dropped.
    if (sequence.starts_with('C') || sequence.starts_with('M'))
        && sequence.len() > 1
        && sequence[1..].bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Some(String::new());
    }

    None
}

fn decode_hex(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect();

    Some(match String::from_utf8(bytes) {
        Ok(text) => text,
        // Single-byte character sets: map each byte to the code point of the same value.
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    })
}

/// Resolves every escape sequence in `text`.
///
/// Unknown or unterminated sequences are kept verbatim.
pub fn unescape(text: &str, delimiters: &Delimiters) -> String {
    let esc = delimiters.escape;
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(esc) {
        out.push_str(&rest[..start]);
        let after = &rest[start + esc.len_utf8()..];
        match after.find(esc) {
            Some(end) => {
                let sequence = &after[..end];
                match decode_sequence(sequence, delimiters) {
                    Some(decoded) => out.push_str(&decoded),
                    None => {
                        out.push(esc);
                        out.push_str(sequence);
                        out.push(esc);
                    }
                }
                rest = &after[end + esc.len_utf8()..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Escapes delimiter characters so `text` can be embedded in a single HL7 leaf value.
pub fn escape(text: &str, delimiters: &Delimiters) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = if c == delimiters.escape {
            Some('E')
        } else if c == delimiters.field {
            Some('F')
        } else if c == delimiters.component {
            Some('S')
        } else if c == delimiters.subcomponent {
            Some('T')
        } else if c == delimiters.repetition {
            Some('R')
        } else {
            None
        };

        match code {
            Some(code) => {
                out.push(delimiters.escape);
                out.push(code);
                out.push(delimiters.escape);
            }
            None if c == '\r' || c == '\n' => out.push(' '),
            None => out.push(c),
        }
    }
    out
}
