use tts_core::GenerationRequest;

use crate::error::ApiError;

/// Validate a generation request.
///
/// Only the text is checked here; voice and language are the model's
/// business and come back as generation errors when they are wrong.
pub fn validate_generation_request(req: &GenerationRequest) -> Result<(), ApiError> {
    req.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}
