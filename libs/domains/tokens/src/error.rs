use thiserror::Error;

/// Row-level token errors. Any of these drops the offending row only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Secret must be {expected} bytes, got {actual}")]
    SecretLength { expected: usize, actual: usize },

    #[error("Action '{0}' requires a code but the row has none")]
    MissingCode(String),

    #[error("Code '{0}' is not numeric")]
    InvalidCode(String),

    #[error("Signing key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("Signing key is not valid hex: {0}")]
    KeyEncoding(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Malformed signed payload: {0}")]
    Payload(String),

    #[error("Signature does not match")]
    SignatureMismatch,

    #[error("Malformed batch line: {0}")]
    Wire(String),
}

pub type TokenResult<T> = Result<T, TokenError>;
