//! Tagged-record serialization.

use crate::{GatewayError, GatewayResult};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Root element of every payload.
pub const RECORD_ELEMENT: &str = "Record";

/// Literal written after a flush when end-of-message signalling is enabled.
pub const EOF_SENTINEL: &str = "<EOF/>";

/// Writes `(tag, value)` pairs as `<Record><Tag>value</Tag>...</Record>`.
pub(crate) fn write_record(pairs: &[(&str, String)]) -> GatewayResult<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_event(&mut writer, Event::Start(BytesStart::new(RECORD_ELEMENT)))?;
    for (tag, value) in pairs {
        write_event(&mut writer, Event::Start(BytesStart::new(*tag)))?;
        if !value.is_empty() {
            write_event(&mut writer, Event::Text(BytesText::new(value)))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new(*tag)))?;
    }
    write_event(&mut writer, Event::End(BytesEnd::new(RECORD_ELEMENT)))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| GatewayError::Serialization(e.to_string()))
}

fn write_event(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> GatewayResult<()> {
    writer
        .write_event(event)
        .map_err(|e| GatewayError::Serialization(e.to_string()))
}

/// Reads a serialized record back into `(tag, value)` pairs, fixed pair included.
///
/// # Errors
/// [`GatewayError::Serialization`] if the payload is not a single well-formed `<Record>`.
pub fn parse_payload(payload: &str) -> GatewayResult<Vec<(String, String)>> {
    let mut reader = Reader::from_str(payload);
    let mut pairs = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<(String, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                depth += 1;
                match depth {
                    1 if name == RECORD_ELEMENT => {}
                    1 => {
                        return Err(GatewayError::Serialization(format!(
                            "expected <{RECORD_ELEMENT}>, found <{name}>"
                        )))
                    }
                    2 => current = Some((name, String::new())),
                    _ => {
                        return Err(GatewayError::Serialization(format!(
                            "nested element <{name}> inside a field"
                        )))
                    }
                }
            }
            Event::Empty(e) if depth == 1 => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                pairs.push((name, String::new()));
            }
            Event::Text(t) => {
                if let Some((_, value)) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| GatewayError::Serialization(e.to_string()))?;
                    value.push_str(&text);
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some(pair) = current.take() {
                        pairs.push(pair);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if pairs.is_empty() {
        return Err(GatewayError::Serialization("payload has no fields".into()));
    }
    Ok(pairs)
}
