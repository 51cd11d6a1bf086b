//! DEA registration number normalization.

use crate::{EngineError, EngineResult};

/// Length of a DEA registration number.
pub const DEA_LENGTH: usize = 9;

/// Strips punctuation and upper-cases `raw`, then validates it when `strong` is set.
///
/// A 13-character value ending in `0000` is a padded number and is cut to its first nine
/// characters. An empty input stays empty and is never an error.
///
/// # Errors
///
/// With `strong` validation, `EngineError::FieldValidation` if the result is not nine
/// characters, the second character is neither a letter nor `9`, or characters three to seven
/// are not digits.
pub fn normalize(raw: &str, strong: bool) -> EngineResult<String> {
    let mut dea: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if dea.len() == 13 && dea.ends_with("0000") {
        dea.truncate(DEA_LENGTH);
    }
    if dea.is_empty() || !strong {
        return Ok(dea);
    }

    let fail = |reason: String| {
        tracing::error!(dea = %dea, "{reason}");
        Err(EngineError::FieldValidation(format!("DEA {dea}: {reason}")))
    };

    if dea.len() < DEA_LENGTH {
        return fail(format!("below minimum length of {DEA_LENGTH}"));
    }
    if dea.len() > DEA_LENGTH {
        return fail(format!("exceeds maximum length of {DEA_LENGTH}"));
    }

    let bytes = dea.as_bytes();
    if !(bytes[1].is_ascii_alphabetic() || bytes[1] == b'9') {
        return fail("second character must be a letter or 9".into());
    }
    if !bytes[2..7].iter().all(u8::is_ascii_digit) {
        return fail("characters 3-7 must be digits".into());
    }
    Ok(dea)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_uppercases() {
        assert_eq!(normalize("ab-123456.7", true).expect("valid"), "AB1234567");
    }

    #[test]
    fn short_number_fails_minimum_length() {
        let err = normalize("AB123456", true).expect_err("eight characters");
        assert!(matches!(err, EngineError::FieldValidation(msg) if msg.contains("minimum length")));
    }

    #[test]
    fn padded_number_is_cut_to_nine() {
        assert_eq!(normalize("AB12345670000", true).expect("valid"), "AB1234567");
    }

    #[test]
    fn second_character_rule() {
        assert!(normalize("A91234567", true).is_ok());
        assert!(normalize("A11234567", true).is_err());
    }

    #[test]
    fn middle_digits_rule() {
        let err = normalize("ABX234567", true).expect_err("letter in digit run");
        assert!(matches!(err, EngineError::FieldValidation(msg) if msg.contains("digits")));
    }

    #[test]
    fn weak_mode_only_normalizes() {
        assert_eq!(normalize("x-1", false).expect("weak"), "X1");
        assert_eq!(normalize("", true).expect("empty passes"), "");
    }
}
