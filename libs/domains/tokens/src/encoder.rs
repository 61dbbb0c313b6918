use batch_collector::RowEncoder;

use crate::error::{TokenError, TokenResult};
use crate::models::{Secret, SignedPayload, WorkItem};
use crate::signing::SigningKey;

/// Turns dequeued token rows into signed field groups
#[derive(Debug, Clone)]
pub struct TokenEncoder {
    key: SigningKey,
}

impl TokenEncoder {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn sign_item(&self, item: &WorkItem) -> TokenResult<SignedPayload> {
        let secret = Secret::try_from(item.secret.as_slice())?;
        let kind = item.kind();

        let code = if kind.uses_code() {
            let code = item
                .code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .ok_or_else(|| TokenError::MissingCode(item.action.clone()))?;
            if !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TokenError::InvalidCode(code.to_string()));
            }
            Some(code.to_string())
        } else {
            None
        };

        let token = self.key.sign(kind, &secret, code.as_deref())?;

        Ok(SignedPayload {
            action: kind,
            email: item.email.clone(),
            username: item.username.clone(),
            token,
            code,
        })
    }
}

impl RowEncoder<WorkItem> for TokenEncoder {
    type Error = TokenError;

    fn encode(&self, row: &WorkItem) -> TokenResult<String> {
        self.sign_item(row).map(|payload| payload.to_string())
    }
}
