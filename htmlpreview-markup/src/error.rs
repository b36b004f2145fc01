use thiserror::Error;

pub type SanitizeResult<T> = Result<T, SanitizationError>;
pub type FragmentResult<T> = Result<T, FragmentError>;

/// Failure of the sanitization stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitizationError {
    #[error("Invalid HTML content: input is empty")]
    EmptyInput,

    #[error("Sanitizer failed: {0}")]
    Engine(String),
}

/// Failure while splitting sanitized markup into style, script and body parts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Markup is empty")]
    EmptyMarkup,

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Parsed markup has no body element")]
    MissingBody,
}
