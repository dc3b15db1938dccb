//! Input validation utilities.
//!
//! Free text (justifications, revocation reasons, comments, clinical notes) is bounded and
//! trimmed here before it reaches a record or the audit trail.

use crate::constants::MAX_FREE_TEXT_LEN;
use crate::{ClinicalError, ClinicalResult};
use securemed_types::NonEmptyText;

/// Trims optional free text and enforces the length bound.
///
/// Returns `None` for empty or whitespace-only input.
///
/// # Errors
///
/// Returns `ClinicalError::Validation` if the trimmed text is longer than
/// [`MAX_FREE_TEXT_LEN`] characters or contains control characters other than newlines and tabs.
pub fn optional_text(field: &str, value: Option<&str>) -> ClinicalResult<Option<String>> {
    let Some(trimmed) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if trimmed.chars().count() > MAX_FREE_TEXT_LEN {
        return Err(ClinicalError::Validation(format!(
            "{} exceeds maximum length of {} characters",
            field, MAX_FREE_TEXT_LEN
        )));
    }

    if trimmed
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(ClinicalError::Validation(format!(
            "{} contains control characters",
            field
        )));
    }

    Ok(Some(trimmed.to_owned()))
}

/// Like [`optional_text`], but the text must be present.
pub fn required_text(field: &str, value: &str) -> ClinicalResult<NonEmptyText> {
    let text = optional_text(field, Some(value))?
        .ok_or_else(|| ClinicalError::Validation(format!("{} is required", field)))?;
    Ok(NonEmptyText::new(text)?)
}
