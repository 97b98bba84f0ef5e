use crate::error::ApiError;

/// Longest session, card or exercise identifier accepted
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate a synthesis request
pub fn validate_tts_request(
    text: &str,
    session_id: Option<&str>,
    card_id: Option<&str>,
    exercise: Option<&str>,
) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text is required".to_string()));
    }

    validate_identifier("sessionId", session_id)?;
    validate_identifier("cardId", card_id)?;
    validate_identifier("exercise", exercise)?;

    Ok(())
}

/// Identifiers are echoed back in response headers, so they must be short
/// visible ASCII.
fn validate_identifier(field: &str, value: Option<&str>) -> Result<(), ApiError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "{field} too long (max {MAX_IDENTIFIER_LENGTH} characters)"
        )));
    }
    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ApiError::InvalidInput(format!(
            "{field} must contain only visible ASCII characters"
        )));
    }
    Ok(())
}

/// Validate the tenant identifier taken from the request headers
pub fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::Unauthenticated);
    }
    validate_identifier("x-user-id", Some(user_id))
}
