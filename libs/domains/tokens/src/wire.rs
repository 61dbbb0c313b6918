//! Parsing of emitted batch lines.
//!
//! A line is a flat comma-separated list of 5-field groups:
//! `action,email,username,token,code[,action,email,username,token,code]...`

use crate::error::{TokenError, TokenResult};
use crate::models::{ActionKind, SignedPayload};

/// Fields per group
pub const GROUP_FIELDS: usize = 5;

/// Split one batch line back into its field groups.
pub fn parse_line(line: &str) -> TokenResult<Vec<SignedPayload>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() % GROUP_FIELDS != 0 {
        return Err(TokenError::Wire(format!(
            "{} fields is not a multiple of {GROUP_FIELDS}",
            fields.len()
        )));
    }

    fields
        .chunks_exact(GROUP_FIELDS)
        .map(|group| {
            let code: u8 = group[0]
                .parse()
                .map_err(|_| TokenError::Wire(format!("action '{}' is not numeric", group[0])))?;

            Ok(SignedPayload {
                action: ActionKind::from_code(code),
                email: group[1].to_string(),
                username: group[2].to_string(),
                token: group[3].to_string(),
                code: (!group[4].is_empty()).then(|| group[4].to_string()),
            })
        })
        .collect()
}
