//! Validation of free-text directive input.
//!
//! Every piece of text a user types (prefix, suffix, removal text, replacement
//! pair, custom timestamp output) passes through [`validate_text`] before it is
//! allowed to become a directive.

use crate::error::{DomainError, DomainResult};

/// Maximum length of a single free-text input, in characters.
pub const MAX_INPUT_CHARS: usize = 100;

/// Characters that are never legal inside a filename component.
pub const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Returns true if `c` may not appear in a filename.
#[must_use]
pub fn is_illegal_char(c: char) -> bool {
    ILLEGAL_FILENAME_CHARS.contains(&c) || c.is_control()
}

/// Validates and normalizes a free-text input.
///
/// The input is trimmed. Empty input is rejected unless `allow_empty` is set
/// (used for the replacement side of a replace pair, where empty means delete).
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` naming `field` when the text is empty,
/// longer than [`MAX_INPUT_CHARS`], or contains a path or control character.
pub fn validate_text(input: &str, field: &str, allow_empty: bool) -> DomainResult<String> {
    let text = input.trim();

    if text.is_empty() {
        if allow_empty {
            return Ok(String::new());
        }
        return Err(DomainError::invalid_input(field, "must not be empty"));
    }

    let len = text.chars().count();
    if len > MAX_INPUT_CHARS {
        return Err(DomainError::invalid_input(
            field,
            format!("too long ({len} characters, max {MAX_INPUT_CHARS})"),
        ));
    }

    if let Some(bad) = text.chars().find(|c| is_illegal_char(*c)) {
        let shown = if bad.is_control() {
            format!("U+{:04X}", u32::from(bad))
        } else {
            bad.to_string()
        };
        return Err(DomainError::invalid_input(
            field,
            format!("contains forbidden character {shown} (avoid / \\ : * ? \" < > |)"),
        ));
    }

    Ok(text.to_string())
}
