use thiserror::Error;

/// Upper bound on an opaque user identifier.
pub const MAX_USER_ID_LEN: usize = 128;
/// Upper bound on message ciphertext.
pub const MAX_CONTENT_LEN: usize = 64 * 1024;
/// Upper bound on a client supplied message id.
pub const MAX_MESSAGE_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} is too long (max {max}, got {got})")]
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },
    #[error("{field} contains control characters")]
    InvalidCharacters { field: &'static str },
    #[error("{field} must not start or end with whitespace")]
    SurroundingWhitespace { field: &'static str },
}

fn validate_identifier(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Missing { field });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            max,
            got: value.len(),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidCharacters { field });
    }
    // Identifiers are compared byte for byte by the registry and the resolver.
    if value.trim() != value {
        return Err(ValidationError::SurroundingWhitespace { field });
    }
    Ok(())
}

pub fn validate_user_id(field: &'static str, user_id: &str) -> Result<(), ValidationError> {
    validate_identifier(field, user_id, MAX_USER_ID_LEN)
}

pub fn validate_conversation_id(conversation_id: &str) -> Result<(), ValidationError> {
    // Two user ids plus the separator.
    validate_identifier("conversationId", conversation_id, MAX_USER_ID_LEN * 2 + 1)
}

pub fn validate_message_id(message_id: &str) -> Result<(), ValidationError> {
    validate_identifier("messageId", message_id, MAX_MESSAGE_ID_LEN)
}

pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::Missing { field: "content" });
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::TooLong {
            field: "content",
            max: MAX_CONTENT_LEN,
            got: content.len(),
        });
    }
    Ok(())
}
