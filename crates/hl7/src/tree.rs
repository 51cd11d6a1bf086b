//! Parsed element tree and path accessor.
//!
//! A message is held as an ordered list of generic [`Segment`] nodes. Each segment owns its
//! elements in tree order, and every element is addressed by a dotted path whose dot-count is
//! its nesting depth: `PID.5` (field), `PID.5.1` (component), `PID.5.1.2` (sub-component).
//! Field repetitions share a path and are told apart by their repetition index.
//!
//! Component and sub-component elements are only created when the enclosing value actually
//! contains the corresponding delimiter. Lookups of `X.n.1` therefore fall back to `X.n`
//! (see [`Segment::get`]), so `PID.3.1` resolves for both `12345` and `12345^^^FAC`.

use crate::escape::decode_sequence;
use crate::tokenizer::{Token, Tokenizer};
use crate::{Delimiters, Hl7Error, Hl7Result};

/// One addressable value in the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub path: String,
    pub repetition: usize,
    pub value: String,
}

/// A segment node, generic over its root tag (`PID`, `ORC`, `RXE`, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    name: String,
    elements: Vec<Element>,
}

impl Segment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    fn find(&self, path: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.value.as_str())
    }

    /// Returns the first value at `path`, or an empty string.
    ///
    /// If nothing matches and the path ends in `.1` with more than one dot, the lookup is
    /// retried once with that suffix removed.
    pub fn get(&self, path: &str) -> &str {
        let path = normalize_path(path);
        self.find(&path)
            .or_else(|| fallback_path(&path).and_then(|p| self.find(p)))
            .unwrap_or("")
    }

    /// Returns every value at `path` (all repetitions) in tree order.
    pub fn get_list(&self, path: &str) -> Vec<&str> {
        let path = normalize_path(path);
        self.elements
            .iter()
            .filter(|e| e.path == path)
            .map(|e| e.value.as_str())
            .collect()
    }
}

/// The parsed form of one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementTree {
    delimiters: Delimiters,
    segments: Vec<Segment>,
}

impl ElementTree {
    /// Tokenizes and builds the tree for one message.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::MalformedInput`] if the header declaration is invalid or the message
    /// carries no `MSH` segment.
    pub fn parse(text: &str) -> Hl7Result<Self> {
        let framing = |c: char| {
            c == char::from(crate::mllp::START_BLOCK)
                || c == char::from(crate::mllp::END_BLOCK)
                || c.is_whitespace()
        };
        let text = text.trim_matches(framing);

        let delimiters = Delimiters::from_header(text)?;
        let mut builder = TreeBuilder::new(delimiters);
        for token in Tokenizer::new(text, delimiters) {
            builder.push(token);
        }
        let segments = builder.finish();

        if !segments.iter().any(|s| s.name == "MSH") {
            return Err(Hl7Error::MalformedInput(
                "message does not contain an MSH segment".into(),
            ));
        }

        tracing::debug!(segments = segments.len(), "parsed element tree");
        Ok(Self {
            delimiters,
            segments,
        })
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    fn find(&self, path: &str) -> Option<&str> {
        let name = segment_name(path);
        self.segments
            .iter()
            .filter(|s| s.name == name)
            .find_map(|s| s.find(path))
    }

    /// Returns the first value at `path` across the whole message, or an empty string.
    pub fn get(&self, path: &str) -> &str {
        let path = normalize_path(path);
        self.find(&path)
            .or_else(|| fallback_path(&path).and_then(|p| self.find(p)))
            .unwrap_or("")
    }

    /// Returns every value at `path` across all segments with that name, in tree order.
    pub fn get_list(&self, path: &str) -> Vec<&str> {
        let path = normalize_path(path);
        let name = segment_name(&path);
        self.segments
            .iter()
            .filter(|s| s.name == name)
            .flat_map(|s| s.get_list(&path))
            .collect()
    }
}

fn segment_name(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    match path.split_once('.') {
        Some((name, rest)) => format!("{}.{}", name.to_ascii_uppercase(), rest),
        None => path.to_ascii_uppercase(),
    }
}

fn fallback_path(path: &str) -> Option<&str> {
    if path.matches('.').count() > 1 {
        path.strip_suffix(".1")
    } else {
        None
    }
}

/// Decoded and raw text of one sub-component.
#[derive(Default)]
struct Part {
    decoded: String,
    raw: String,
}

fn raw_component(parts: &[Part], separator: char) -> String {
    parts
        .iter()
        .map(|p| p.raw.as_str())
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

struct TreeBuilder {
    delimiters: Delimiters,
    segments: Vec<Segment>,
    name: String,
    named: bool,
    elements: Vec<Element>,
    field: usize,
    repetition: usize,
    open: bool,
    components: Vec<Vec<Part>>,
}

impl TreeBuilder {
    fn new(delimiters: Delimiters) -> Self {
        Self {
            delimiters,
            segments: Vec::new(),
            name: String::new(),
            named: false,
            elements: Vec::new(),
            field: 0,
            repetition: 0,
            open: false,
            components: Vec::new(),
        }
    }

    fn push(&mut self, token: Token<'_>) {
        match token {
            Token::Text(text) => self.append(text, text),
            Token::Escape(sequence) => {
                let esc = self.delimiters.escape;
                let raw = format!("{esc}{sequence}{esc}");
                let decoded =
                    decode_sequence(sequence, &self.delimiters).unwrap_or_else(|| raw.clone());
                self.append(&decoded, &raw);
            }
            Token::Declaration(encoding) => {
                self.named = true;
                let name = self.name.trim().to_ascii_uppercase();
                self.elements.push(Element {
                    path: format!("{name}.1"),
                    repetition: 0,
                    value: self.delimiters.field.to_string(),
                });
                self.elements.push(Element {
                    path: format!("{name}.2"),
                    repetition: 0,
                    value: encoding.to_string(),
                });
                self.field = 2;
                self.open = false;
            }
            Token::Field => {
                self.named = true;
                self.close_repetition();
                self.field += 1;
                self.repetition = 0;
                self.open_repetition();
            }
            Token::Repetition if self.open => {
                self.close_repetition();
                self.repetition += 1;
                self.open_repetition();
            }
            Token::Component if self.open => self.components.push(vec![Part::default()]),
            Token::SubComponent if self.open => {
                if let Some(component) = self.components.last_mut() {
                    component.push(Part::default());
                }
            }
            Token::Repetition | Token::Component | Token::SubComponent => {
                // Delimiters inside a segment name carry no structure.
            }
            Token::SegmentEnd => self.close_segment(),
        }
    }

    fn append(&mut self, decoded: &str, raw: &str) {
        if !self.named {
            self.name.push_str(raw);
            return;
        }
        if !self.open {
            return;
        }
        if let Some(part) = self.components.last_mut().and_then(|c| c.last_mut()) {
            part.decoded.push_str(decoded);
            part.raw.push_str(raw);
        }
    }

    fn open_repetition(&mut self) {
        self.components = vec![vec![Part::default()]];
        self.open = true;
    }

    fn close_repetition(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let name = self.name.trim().to_ascii_uppercase();
        let field_path = format!("{}.{}", name, self.field);
        let rep = self.repetition;
        let components = std::mem::take(&mut self.components);

        let sub = self.delimiters.subcomponent;

        if components.len() == 1 && components[0].len() == 1 {
            self.elements.push(Element {
                path: field_path,
                repetition: rep,
                value: components[0][0].decoded.clone(),
            });
            return;
        }

        let raw_field = components
            .iter()
            .map(|parts| raw_component(parts, sub))
            .collect::<Vec<_>>()
            .join(&self.delimiters.component.to_string());
        let mut emitted = vec![Element {
            path: field_path.clone(),
            repetition: rep,
            value: raw_field,
        }];

        for (ci, parts) in components.iter().enumerate() {
            let component_path = format!("{}.{}", field_path, ci + 1);
            if parts.len() == 1 {
                emitted.push(Element {
                    path: component_path,
                    repetition: rep,
                    value: parts[0].decoded.clone(),
                });
                continue;
            }
            emitted.push(Element {
                path: component_path.clone(),
                repetition: rep,
                value: raw_component(parts, sub),
            });
            for (si, part) in parts.iter().enumerate() {
                emitted.push(Element {
                    path: format!("{}.{}", component_path, si + 1),
                    repetition: rep,
                    value: part.decoded.clone(),
                });
            }
        }

        self.elements.extend(emitted);
    }

    fn close_segment(&mut self) {
        self.close_repetition();
        let name = self.name.trim().to_ascii_uppercase();
        let elements = std::mem::take(&mut self.elements);
        if !name.is_empty() {
            self.segments.push(Segment { name, elements });
        }
        self.name.clear();
        self.named = false;
        self.field = 0;
        self.repetition = 0;
        self.components.clear();
    }

    fn finish(mut self) -> Vec<Segment> {
        self.close_segment();
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "MSH|^~\\&|A|B|C|D|20240101120000||EVT^TRG|CTRL|P|V|";

    #[test]
    fn places_header_fields_and_declaration() {
        let tree = ElementTree::parse(HEADER).expect("parse header");
        assert_eq!(tree.get("MSH.1"), "|");
        assert_eq!(tree.get("MSH.2"), "^~\\&");
        assert_eq!(tree.get("MSH.3"), "A");
        assert_eq!(tree.get("MSH.4"), "B");
        assert_eq!(tree.get("MSH.5"), "C");
        assert_eq!(tree.get("MSH.6"), "D");
        assert_eq!(tree.get("MSH.7"), "20240101120000");
        assert_eq!(tree.get("MSH.8"), "");
        assert_eq!(tree.get("MSH.9"), "EVT^TRG");
        assert_eq!(tree.get("MSH.9.1"), "EVT");
        assert_eq!(tree.get("MSH.9.2"), "TRG");
        assert_eq!(tree.get("MSH.10"), "CTRL");
        assert_eq!(tree.get("MSH.11"), "P");
        assert_eq!(tree.get("MSH.12"), "V");
    }

    #[test]
    fn paths_are_unique_within_segment_per_repetition() {
        let msg = format!("{HEADER}\rPID|1||123^^^FAC~456^^^OTHER||DOE^JOHN&J^Q\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        for segment in tree.segments() {
            let mut seen = std::collections::HashSet::new();
            for e in segment.elements() {
                assert!(seen.insert((e.path.clone(), e.repetition)), "duplicate {}", e.path);
                assert!(e.path.matches('.').count() <= 3, "too deep: {}", e.path);
            }
        }
    }

    #[test]
    fn builds_components_subcomponents_and_repetitions() {
        let msg = format!("{HEADER}\rPID|1||123^^^FAC~456^^^OTHER||DOE^JOHN&J^Q\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        assert_eq!(tree.get("PID.1"), "1");
        assert_eq!(tree.get("PID.3.1"), "123");
        assert_eq!(tree.get("PID.3.4"), "FAC");
        assert_eq!(tree.get_list("PID.3.1"), vec!["123", "456"]);
        assert_eq!(tree.get_list("PID.3.4"), vec!["FAC", "OTHER"]);
        assert_eq!(tree.get("PID.5.1"), "DOE");
        assert_eq!(tree.get("PID.5.2"), "JOHN&J");
        assert_eq!(tree.get("PID.5.2.1"), "JOHN");
        assert_eq!(tree.get("PID.5.2.2"), "J");
        assert_eq!(tree.get("PID.5.3"), "Q");
    }

    #[test]
    fn trailing_one_falls_back_to_parent() {
        let msg = format!("{HEADER}\rPID|1||12345\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        assert_eq!(tree.get("PID.3.1"), "12345");
        assert_eq!(tree.get("PID.3.1.1"), "12345");
        assert_eq!(tree.get("PID.3.2"), "");
        assert_eq!(tree.get("PID.4.1"), "");
        // One dot only: no fallback from field to segment.
        assert_eq!(tree.get("MSH.1"), "|");
        assert_eq!(tree.get("ZZZ.1"), "");
    }

    #[test]
    fn empty_first_component_does_not_fall_back() {
        let msg = format!("{HEADER}\rPID|1||^^^FAC\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        assert_eq!(tree.get("PID.3.1"), "");
        assert_eq!(tree.get("PID.3.4"), "FAC");
    }

    #[test]
    fn escapes_resolve_at_leaves_only() {
        let msg = format!("{HEADER}\rNTE|1||Take 1\\S\\2 \\F\\ daily^x\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        assert_eq!(tree.get("NTE.3.1"), "Take 1^2 | daily");
        assert_eq!(tree.get("NTE.3"), "Take 1\\S\\2 \\F\\ daily^x");
    }

    #[test]
    fn accepts_lf_and_crlf_terminators_and_framing() {
        let msg = format!("\u{0b}{HEADER}\r\nPID|1||9\n\nPV1|1|I\r\u{1c}\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        let names: Vec<&str> = tree.segments().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["MSH", "PID", "PV1"]);
        assert_eq!(tree.get("PV1.2"), "I");
    }

    #[test]
    fn get_list_spans_repeated_segments() {
        let msg = format!("{HEADER}\rNTE|1||first\rNTE|2||second\r");
        let tree = ElementTree::parse(&msg).expect("parse");
        assert_eq!(tree.get("NTE.3"), "first");
        assert_eq!(tree.get_list("nte.3"), vec!["first", "second"]);
    }

    #[test]
    fn rejects_message_without_header() {
        let err = ElementTree::parse("PID|1||2").expect_err("no header");
        assert!(matches!(err, Hl7Error::MalformedInput(_)));

        let err = ElementTree::parse("BHS|^~\\&|X\rBTS|0").expect_err("batch without MSH");
        assert!(matches!(err, Hl7Error::MalformedInput(msg) if msg.contains("MSH")));
    }
}
