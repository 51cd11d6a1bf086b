//! Field definitions and values.

use crate::record::Operation;

/// When a field must carry a value, keyed by a single-character class code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredClass {
    /// `K`: part of the record key, required for every operation.
    Key,
    /// `A`: required when adding.
    Add,
    /// `C`: required when changing.
    Change,
    /// `W`: would-like; sent when present, never enforced.
    WouldLike,
}

impl RequiredClass {
    pub fn code(&self) -> char {
        match self {
            RequiredClass::Key => 'K',
            RequiredClass::Add => 'A',
            RequiredClass::Change => 'C',
            RequiredClass::WouldLike => 'W',
        }
    }

    /// Whether this class demands a value under `operation`.
    pub fn applies_to(&self, operation: Operation) -> bool {
        match self {
            RequiredClass::Key => true,
            RequiredClass::Add => operation == Operation::Add,
            RequiredClass::Change => operation == Operation::Change,
            RequiredClass::WouldLike => false,
        }
    }
}

/// Static description of one field in a record kind's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub tag: &'static str,
    pub max_len: usize,
    pub class: RequiredClass,
    /// Required regardless of operation.
    pub universal: bool,
}

impl FieldSpec {
    pub const fn new(tag: &'static str, max_len: usize, class: RequiredClass) -> Self {
        Self {
            tag,
            max_len,
            class,
            universal: false,
        }
    }

    pub const fn universal(mut self) -> Self {
        self.universal = true;
        self
    }

    pub fn required_for(&self, operation: Operation) -> bool {
        self.universal || self.class.applies_to(operation)
    }
}

/// A field definition plus its current value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub spec: FieldSpec,
    pub value: String,
}

impl Field {
    pub fn new(spec: FieldSpec) -> Self {
        Self {
            spec,
            value: String::new(),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.spec.tag
    }

    pub fn is_blank(&self) -> bool {
        self.value.is_empty()
    }
}

/// Cuts `value` to at most `max` characters without splitting a code point.
pub(crate) fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_class_by_operation() {
        assert!(RequiredClass::Key.applies_to(Operation::Delete));
        assert!(RequiredClass::Add.applies_to(Operation::Add));
        assert!(!RequiredClass::Add.applies_to(Operation::Change));
        assert!(RequiredClass::Change.applies_to(Operation::Change));
        assert!(!RequiredClass::WouldLike.applies_to(Operation::Add));
    }

    #[test]
    fn universal_overrides_class() {
        let spec = FieldSpec::new("Sig", 10, RequiredClass::WouldLike).universal();
        assert!(spec.required_for(Operation::Delete));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("Zoë Smith", 3), "Zoë");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
