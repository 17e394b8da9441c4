//! AWS SDK error mapping into provider errors

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stackpilot_core::ProviderError;

/// Service error codes that indicate a transient condition on AWS's side
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ServiceUnavailable",
    "InternalFailure",
];

/// Convert an SDK error. Anything short of a service response is transport.
pub(crate) fn from_sdk<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(_) => classify_service_error(
            err.code(),
            err.message().unwrap_or_default(),
        ),
        _ => ProviderError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

/// CloudFormation reports most client errors as `ValidationError`, so the
/// message text is what distinguishes a missing stack from an empty update.
pub(crate) fn classify_service_error(code: Option<&str>, message: &str) -> ProviderError {
    let code = code.unwrap_or("Unknown");

    if message.contains("does not exist") {
        return ProviderError::NotFound(message.to_string());
    }
    if message.contains("No updates are to be performed") {
        return ProviderError::NoChanges(message.to_string());
    }
    if code == "AlreadyExistsException" {
        return ProviderError::AlreadyExists(message.to_string());
    }
    if TRANSIENT_CODES.contains(&code) {
        return ProviderError::Transport(format!("{}: {}", code, message));
    }

    ProviderError::Rejected {
        code: code.to_string(),
        message: message.to_string(),
    }
}
