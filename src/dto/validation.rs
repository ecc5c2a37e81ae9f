//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted session or user identifier.
pub const MAX_ID_LEN: usize = 128;

/// Validates that an identifier is 1 to 128 ASCII letters, digits, `-` or `_`.
///
/// Identifiers are used as document keys and as field names inside the stored
/// session (`players.<user_id>`), so dots and `$` are never accepted.
///
/// # Examples
///
/// ```ignore
/// validate_id("user_42")   // Ok
/// validate_id("a.b")       // Err - dot
/// validate_id("")          // Err - empty
/// ```
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        let mut err = ValidationError::new("id_length");
        err.message = Some(
            format!(
                "Identifier must be between 1 and {MAX_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("id_format");
        err.message =
            Some("Identifier must contain only ASCII letters, digits, '-' or '_'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates an optional free-form text that must not be blank when present.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}
