//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::ids::{DeviceId, PlayerId};

/// Longest identifier accepted from clients.
pub const MAX_ID_LENGTH: usize = 64;

/// Validates a platform identifier: non-blank, at most [`MAX_ID_LENGTH`] characters
/// and free of control characters.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("player-42") // Ok
/// validate_identifier("   ")       // Err - blank
/// validate_identifier("a\tb")      // Err - control character
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        let mut err = ValidationError::new("id_empty");
        err.message = Some("Identifier must not be empty".into());
        return Err(err);
    }

    let length = id.chars().count();
    if length > MAX_ID_LENGTH {
        let mut err = ValidationError::new("id_length");
        err.message = Some(
            format!("Identifier must be at most {MAX_ID_LENGTH} characters (got {length})").into(),
        );
        return Err(err);
    }

    if id.chars().any(char::is_control) {
        let mut err = ValidationError::new("id_format");
        err.message = Some("Identifier must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// [`validate_identifier`] for player ids.
pub fn validate_player_id(id: &PlayerId) -> Result<(), ValidationError> {
    validate_identifier(id.as_str())
}

/// [`validate_identifier`] for device ids.
pub fn validate_device_id(id: &DeviceId) -> Result<(), ValidationError> {
    validate_identifier(id.as_str())
}
