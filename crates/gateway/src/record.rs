//! Output records and their set/clear/validate cycle.

use crate::field::{truncate_chars, Field, FieldSpec};
use crate::{payload, tables, GatewayError, GatewayResult};
use std::fmt;

/// Tag of the first fixed field: the record's table name.
pub const TABLE_TAG: &str = "Table";
/// Tag of the second fixed field: the operation code.
pub const ACTION_TAG: &str = "Action";

/// Text sent for an empty Patient `FirstName`.
pub const BLANK_FIRST_NAME: &str = " ";
/// Text sent for an empty Prescription `Sig`.
pub const DEFAULT_SIG: &str = "AS DIRECTED";

const DOSE_TIMING_TAG: &str = "DoseTimesQtys";
const COMMENTS_TAG: &str = "Comments";

/// Downstream entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Store,
    Facility,
    Prescriber,
    Patient,
    Drug,
    TimesQtys,
    Prescription,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Store,
        RecordKind::Facility,
        RecordKind::Prescriber,
        RecordKind::Patient,
        RecordKind::Drug,
        RecordKind::TimesQtys,
        RecordKind::Prescription,
    ];

    /// Ordinal used by the write queue. Lower keys are written first so referenced
    /// entities exist before the records pointing at them.
    pub fn type_key(&self) -> char {
        match self {
            RecordKind::Store => 'A',
            RecordKind::Facility => 'B',
            RecordKind::Prescriber => 'C',
            RecordKind::Patient => 'D',
            RecordKind::Drug => 'E',
            RecordKind::TimesQtys => 'F',
            RecordKind::Prescription => 'G',
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            RecordKind::Store => "Store",
            RecordKind::Facility => "Facility",
            RecordKind::Prescriber => "Prescriber",
            RecordKind::Patient => "Patient",
            RecordKind::Drug => "Drug",
            RecordKind::TimesQtys => "TimesQtys",
            RecordKind::Prescription => "Prescription",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.table_name().eq_ignore_ascii_case(name))
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            RecordKind::Store => tables::STORE,
            RecordKind::Facility => tables::FACILITY,
            RecordKind::Prescriber => tables::PRESCRIBER,
            RecordKind::Patient => tables::PATIENT,
            RecordKind::Drug => tables::DRUG,
            RecordKind::TimesQtys => tables::TIMES_QTYS,
            RecordKind::Prescription => tables::PRESCRIPTION,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Operation requested of the gateway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Operation {
    #[default]
    Add,
    Change,
    Delete,
}

impl Operation {
    pub fn code(&self) -> char {
        match self {
            Operation::Add => 'A',
            Operation::Change => 'C',
            Operation::Delete => 'D',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Operation::Add),
            "C" => Some(Operation::Change),
            "D" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// One output record: a fixed `(Table, Action)` pair followed by the kind's field table.
#[derive(Clone, Debug)]
pub struct Record {
    kind: RecordKind,
    operation: Operation,
    fields: Vec<Field>,
    empty: bool,
    auto_truncate: bool,
    relax_dose_timing: bool,
    allow_zero_quantity: bool,
    annotations: Vec<String>,
}

impl Record {
    pub fn new(kind: RecordKind, operation: Operation) -> Self {
        Self {
            kind,
            operation,
            fields: kind.fields().iter().copied().map(Field::new).collect(),
            empty: true,
            auto_truncate: false,
            relax_dose_timing: false,
            allow_zero_quantity: false,
            annotations: Vec::new(),
        }
    }

    /// Downgrades required-field violations to warnings.
    pub fn with_auto_truncate(mut self, auto_truncate: bool) -> Self {
        self.auto_truncate = auto_truncate;
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn auto_truncate(&self) -> bool {
        self.auto_truncate
    }

    /// Skips the required check on the dose-timing field until the next [`Record::clear`].
    pub fn relax_dose_timing(&mut self) {
        self.relax_dose_timing = true;
    }

    pub fn dose_timing_relaxed(&self) -> bool {
        self.relax_dose_timing
    }

    /// Accepts zero or missing dose quantities until the next [`Record::clear`].
    pub fn allow_zero_quantity(&mut self) {
        self.allow_zero_quantity = true;
    }

    pub fn zero_quantity_allowed(&self) -> bool {
        self.allow_zero_quantity
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Current value of `tag`, if the kind has such a field.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.position(tag).map(|i| self.fields[i].value.as_str())
    }

    /// Sets `tag` to `value`, truncating overlong values.
    pub fn set(&mut self, tag: &str, value: impl AsRef<str>) -> GatewayResult<()> {
        self.set_field(tag, value.as_ref(), false)
    }

    /// Sets a field by tag.
    ///
    /// # Arguments
    /// * `tag` - Field tag, matched case-insensitively against the whole tag name.
    /// * `value` - New value.
    /// * `override_truncation` - Reject overlong values instead of truncating them.
    ///
    /// # Errors
    /// * [`GatewayError::UnknownField`] when the kind has no field called `tag`; the fixed
    ///   `Table`/`Action` pair cannot be set this way.
    /// * [`GatewayError::FieldOverflow`] when the value is too long and `override_truncation`
    ///   is set.
    pub fn set_field(
        &mut self,
        tag: &str,
        value: &str,
        override_truncation: bool,
    ) -> GatewayResult<()> {
        let index = self.position(tag).ok_or_else(|| GatewayError::UnknownField {
            kind: self.kind.table_name(),
            tag: tag.to_string(),
        })?;
        let field = &mut self.fields[index];
        let len = value.chars().count();

        let value = if len > field.spec.max_len {
            if override_truncation {
                return Err(GatewayError::FieldOverflow {
                    kind: self.kind.table_name(),
                    tag: field.spec.tag.to_string(),
                    len,
                    max: field.spec.max_len,
                });
            }
            tracing::warn!(
                record = %self.kind,
                field = field.spec.tag,
                len,
                max = field.spec.max_len,
                "truncating field value"
            );
            truncate_chars(value, field.spec.max_len)
        } else {
            value.to_string()
        };

        if !value.is_empty() {
            self.empty = false;
        }
        field.value = value;
        Ok(())
    }

    /// Appends a note that is merged into `Comments` when the record is serialized.
    pub fn annotate(&mut self, note: impl Into<String>) {
        let note = note.into();
        let note = note.trim();
        if !note.is_empty() {
            self.annotations.push(note.to_string());
        }
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// Blanks every field except the fixed pair and resets the session flags.
    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.value.clear();
        }
        self.annotations.clear();
        self.empty = true;
        self.relax_dose_timing = false;
        self.allow_zero_quantity = false;
    }

    /// Checks every field required by the current operation.
    ///
    /// Empty Patient `FirstName` and Prescription `Sig` are filled with their fallback text
    /// instead of failing. With auto-truncate set, remaining violations are logged and the
    /// empty value passes through.
    ///
    /// # Errors
    /// [`GatewayError::FieldValidation`] naming the first missing field.
    pub fn check_dependencies(&mut self) -> GatewayResult<()> {
        let kind = self.kind;
        let operation = self.operation;
        let relax_dose_timing = self.relax_dose_timing;
        let auto_truncate = self.auto_truncate;

        for field in &mut self.fields {
            if !field.is_blank() || !field.spec.required_for(operation) {
                continue;
            }
            match (kind, field.spec.tag) {
                (RecordKind::Patient, "FirstName") => {
                    field.value = BLANK_FIRST_NAME.to_string();
                    continue;
                }
                (RecordKind::Prescription, "Sig") => {
                    field.value = DEFAULT_SIG.to_string();
                    continue;
                }
                (_, DOSE_TIMING_TAG) if relax_dose_timing => continue,
                _ => {}
            }

            let message = format!(
                "{kind}.{} is required for operation {} (class {})",
                field.spec.tag,
                operation.code(),
                field.spec.class.code()
            );
            if auto_truncate {
                tracing::warn!(record = %kind, field = field.spec.tag, "{message}; sending empty");
            } else {
                tracing::error!(record = %kind, field = field.spec.tag, "{message}");
                return Err(GatewayError::FieldValidation(message));
            }
        }
        Ok(())
    }

    /// Validates and serializes the record into its tagged wire form.
    ///
    /// # Errors
    /// * [`GatewayError::EmptyRecord`] if nothing was ever set.
    /// * Any error from [`Record::check_dependencies`] or the payload writer.
    pub fn to_payload(&mut self) -> GatewayResult<String> {
        if self.empty {
            return Err(GatewayError::EmptyRecord(self.kind.table_name()));
        }
        self.check_dependencies()?;

        let operation = self.operation;
        let mut pairs: Vec<(&str, String)> = Vec::with_capacity(self.fields.len() + 2);
        pairs.push((TABLE_TAG, self.kind.table_name().to_string()));
        pairs.push((ACTION_TAG, operation.code().to_string()));

        for field in &self.fields {
            let value = if field.spec.tag == COMMENTS_TAG {
                self.comments(field)
            } else {
                field.value.clone()
            };
            if !value.is_empty() || field.spec.required_for(operation) {
                pairs.push((field.spec.tag, value));
            }
        }

        let payload = payload::write_record(&pairs)?;
        tracing::debug!(record = %self.kind, %payload, "serialized record");
        Ok(payload)
    }

    fn comments(&self, field: &Field) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.annotations.len() + 1);
        if !field.value.is_empty() {
            parts.push(&field.value);
        }
        parts.extend(self.annotations.iter().map(String::as_str));
        let joined = parts.join("; ");

        if joined.chars().count() > field.spec.max_len {
            tracing::warn!(record = %self.kind, max = field.spec.max_len, "truncating comments");
            truncate_chars(&joined, field.spec.max_len)
        } else {
            joined
        }
    }

    fn position(&self, tag: &str) -> Option<usize> {
        let tag = tag.trim();
        self.fields
            .iter()
            .position(|f| f.spec.tag.eq_ignore_ascii_case(tag))
    }
}
