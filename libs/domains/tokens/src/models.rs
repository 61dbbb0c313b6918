use batch_collector::QueueRow;
use std::fmt;
use strum::{Display, EnumString};

use crate::error::{TokenError, TokenResult};

/// Length of a token secret in bytes
pub const SECRET_LEN: usize = 32;

/// What the token lets the recipient do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    /// Confirm a freshly registered account
    Activation,
    /// Reset a forgotten password; carries a numeric code
    PasswordRecovery,
    /// Anything the collector does not recognise
    Unknown,
}

impl ActionKind {
    /// Parse the database action name; unrecognised names become `Unknown`.
    pub fn from_action(action: &str) -> Self {
        action.trim().parse().unwrap_or(ActionKind::Unknown)
    }

    /// Numeric code written downstream
    pub fn code(&self) -> u8 {
        match self {
            ActionKind::Activation => 1,
            ActionKind::PasswordRecovery => 2,
            ActionKind::Unknown => 0,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ActionKind::Activation,
            2 => ActionKind::PasswordRecovery,
            _ => ActionKind::Unknown,
        }
    }

    /// Prefix of the signed message; ties a signature to the endpoint that accepts it
    pub fn path_tag(&self) -> &'static [u8] {
        match self {
            ActionKind::Activation => b"/account/activate/",
            ActionKind::PasswordRecovery => b"/account/recover/",
            ActionKind::Unknown => b"",
        }
    }

    /// Whether the code is part of the signed message and the output
    pub fn uses_code(&self) -> bool {
        matches!(self, ActionKind::PasswordRecovery)
    }
}

/// Fixed-size token secret
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Secret {
    type Error = TokenError;

    fn try_from(bytes: &[u8]) -> TokenResult<Self> {
        let array = <[u8; SECRET_LEN]>::try_from(bytes).map_err(|_| TokenError::SecretLength {
            expected: SECRET_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// A token row as returned by the dequeue function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub seq: i64,
    pub action: String,
    pub email: String,
    pub username: String,
    pub secret: Vec<u8>,
    pub code: Option<String>,
}

impl WorkItem {
    pub fn kind(&self) -> ActionKind {
        ActionKind::from_action(&self.action)
    }
}

impl QueueRow for WorkItem {
    fn seq(&self) -> i64 {
        self.seq
    }
}

/// One signed field group of a batch line.
///
/// Displays as `action,email,username,token,code` with an empty code field
/// for kinds that do not use one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub action: ActionKind,
    pub email: String,
    pub username: String,
    /// base64 URL-safe `secret ‖ HMAC-SHA256`
    pub token: String,
    pub code: Option<String>,
}

impl fmt::Display for SignedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.action.code(),
            self.email,
            self.username,
            self.token,
            self.code.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        assert_eq!(ActionKind::from_action("activation"), ActionKind::Activation);
        assert_eq!(
            ActionKind::from_action("password_recovery"),
            ActionKind::PasswordRecovery
        );
        assert_eq!(ActionKind::from_action("email_change"), ActionKind::Unknown);

        assert_eq!(ActionKind::Activation.code(), 1);
        assert_eq!(ActionKind::PasswordRecovery.code(), 2);
        assert_eq!(ActionKind::Unknown.code(), 0);
        assert_eq!(ActionKind::from_code(7), ActionKind::Unknown);
        assert_eq!(ActionKind::PasswordRecovery.to_string(), "password_recovery");
    }

    #[test]
    fn test_path_tags_are_distinct() {
        assert_ne!(
            ActionKind::Activation.path_tag(),
            ActionKind::PasswordRecovery.path_tag()
        );
        assert!(!ActionKind::Activation.uses_code());
        assert!(ActionKind::PasswordRecovery.uses_code());
    }

    #[test]
    fn test_secret_length_checked() {
        assert!(Secret::try_from([7u8; SECRET_LEN].as_slice()).is_ok());

        let err = Secret::try_from([7u8; 31].as_slice()).unwrap_err();
        assert_eq!(
            err,
            TokenError::SecretLength {
                expected: 32,
                actual: 31
            }
        );
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new([0xab; SECRET_LEN]);
        assert_eq!(format!("{secret:?}"), "Secret(..)");
    }

    #[test]
    fn test_signed_payload_display() {
        let payload = SignedPayload {
            action: ActionKind::Activation,
            email: "ada@example.com".into(),
            username: "ada".into(),
            token: "dG9rZW4".into(),
            code: None,
        };
        assert_eq!(payload.to_string(), "1,ada@example.com,ada,dG9rZW4,");

        let payload = SignedPayload {
            action: ActionKind::PasswordRecovery,
            code: Some("123456".into()),
            ..payload
        };
        assert_eq!(payload.to_string(), "2,ada@example.com,ada,dG9rZW4,123456");
    }
}
