use crate::core::domain::error::ValidationError;

const MAX_NAME_LENGTH: usize = 64;

/// Validates a node or cluster name.
///
/// Names double as directory keys under the state root, so they are restricted
/// to characters that are safe in a single path segment.
pub(crate) fn validate_entity_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::field(field, "must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::field(
            field,
            format!("must be at most {MAX_NAME_LENGTH} characters"),
        ));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(ValidationError::field(
            field,
            "must not start with '.' or '-'",
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ValidationError::field(
            field,
            format!("contains invalid character {bad:?}"),
        ));
    }
    Ok(())
}
