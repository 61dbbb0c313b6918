//! HMAC-SHA256 token signing.
//!
//! The signed message is `path_tag ‖ secret [‖ code]`; the downstream token is
//! base64 URL-safe (no padding) of `secret ‖ mac`, so a verifier holding the
//! key can recover the secret and check it in one step.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::error::{TokenError, TokenResult};
use crate::models::{ActionKind, SECRET_LEN, Secret};

type HmacSha256 = Hmac<Sha256>;

/// Length of the signing key in bytes
pub const KEY_LEN: usize = 32;

/// Length of an HMAC-SHA256 tag in bytes
pub const MAC_LEN: usize = 32;

/// Build the message that gets signed.
///
/// The code is only appended for kinds that use one.
pub fn signature_input(kind: ActionKind, secret: &Secret, code: Option<&str>) -> Vec<u8> {
    let tag = kind.path_tag();
    let code = code.filter(|_| kind.uses_code()).unwrap_or("");

    let mut input = Vec::with_capacity(tag.len() + SECRET_LEN + code.len());
    input.extend_from_slice(tag);
    input.extend_from_slice(secret.as_bytes());
    input.extend_from_slice(code.as_bytes());
    input
}

/// Fixed-length HMAC key
#[derive(Clone)]
pub struct SigningKey([u8; KEY_LEN]);

impl SigningKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a hex key; must be exactly [`KEY_LEN`] bytes.
    pub fn from_hex(encoded: &str) -> TokenResult<Self> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| TokenError::KeyEncoding(e.to_string()))?;
        let array = <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| TokenError::KeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    fn mac(&self) -> TokenResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.0).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Sign and encode. Deterministic for a fixed key and input.
    pub fn sign(&self, kind: ActionKind, secret: &Secret, code: Option<&str>) -> TokenResult<String> {
        let mut mac = self.mac()?;
        mac.update(&signature_input(kind, secret, code));
        let tag = mac.finalize().into_bytes();

        let mut payload = Vec::with_capacity(SECRET_LEN + MAC_LEN);
        payload.extend_from_slice(secret.as_bytes());
        payload.extend_from_slice(&tag);

        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    /// Decode a token and check its MAC in constant time; returns the secret.
    pub fn verify(&self, kind: ActionKind, token: &str, code: Option<&str>) -> TokenResult<Secret> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| TokenError::Payload(e.to_string()))?;
        if decoded.len() != SECRET_LEN + MAC_LEN {
            return Err(TokenError::Payload(format!(
                "expected {} bytes, got {}",
                SECRET_LEN + MAC_LEN,
                decoded.len()
            )));
        }

        let (secret, tag) = decoded.split_at(SECRET_LEN);
        let secret = Secret::try_from(secret)?;

        let mut mac = self.mac()?;
        mac.update(&signature_input(kind, &secret, code));
        mac.verify_slice(tag)
            .map_err(|_| TokenError::SignatureMismatch)?;

        Ok(secret)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn key() -> SigningKey {
        SigningKey::from_hex(KEY_HEX).unwrap()
    }

    fn secret() -> Secret {
        Secret::new([0x5a; SECRET_LEN])
    }

    #[test]
    fn test_from_hex_rejects_bad_keys() {
        assert!(matches!(
            SigningKey::from_hex("zz"),
            Err(TokenError::KeyEncoding(_))
        ));
        assert_eq!(
            SigningKey::from_hex("0011").unwrap_err(),
            TokenError::KeyLength {
                expected: 32,
                actual: 2
            }
        );
        assert!(SigningKey::from_hex(&format!("  {KEY_HEX}\n")).is_ok());
    }

    #[test]
    fn test_signature_input_layout() {
        let input = signature_input(ActionKind::PasswordRecovery, &secret(), Some("123456"));
        assert!(input.starts_with(b"/account/recover/"));
        assert!(input.ends_with(b"123456"));
        assert_eq!(input.len(), b"/account/recover/".len() + SECRET_LEN + 6);

        // activation ignores any code it is handed
        let input = signature_input(ActionKind::Activation, &secret(), Some("123456"));
        assert_eq!(input.len(), b"/account/activate/".len() + SECRET_LEN);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = key().sign(ActionKind::Activation, &secret(), None).unwrap();
        let b = key().sign(ActionKind::Activation, &secret(), None).unwrap();
        assert_eq!(a, b);

        // 64 bytes -> 86 base64 chars without padding
        assert_eq!(a.len(), 86);
        assert!(!a.contains(['+', '/', '=']));
    }

    #[test]
    fn test_sign_matches_reference_hmac() {
        let token = key().sign(ActionKind::Activation, &secret(), None).unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(&token).unwrap();

        let mut mac = HmacSha256::new_from_slice(&hex::decode(KEY_HEX).unwrap()).unwrap();
        mac.update(b"/account/activate/");
        mac.update(&[0x5a; SECRET_LEN]);
        let expected = mac.finalize().into_bytes();

        assert_eq!(&decoded[..SECRET_LEN], secret().as_bytes());
        assert_eq!(&decoded[SECRET_LEN..], expected.as_slice());
    }

    #[test]
    fn test_verify_round_trip_returns_secret() {
        let token = key()
            .sign(ActionKind::PasswordRecovery, &secret(), Some("042917"))
            .unwrap();
        let recovered = key()
            .verify(ActionKind::PasswordRecovery, &token, Some("042917"))
            .unwrap();
        assert_eq!(recovered, secret());
    }

    #[test]
    fn test_any_bit_flip_fails_verification() {
        let token = key()
            .sign(ActionKind::PasswordRecovery, &secret(), Some("042917"))
            .unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(&token).unwrap();

        for bit in 0..decoded.len() * 8 {
            let mut tampered = decoded.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            let tampered = URL_SAFE_NO_PAD.encode(tampered);

            assert_eq!(
                key().verify(ActionKind::PasswordRecovery, &tampered, Some("042917")),
                Err(TokenError::SignatureMismatch),
                "bit {bit} flipped but verification passed"
            );
        }
    }

    #[test]
    fn test_verify_binds_kind_code_and_key() {
        let token = key()
            .sign(ActionKind::PasswordRecovery, &secret(), Some("042917"))
            .unwrap();

        assert!(key().verify(ActionKind::PasswordRecovery, &token, Some("042918")).is_err());
        assert!(key().verify(ActionKind::Activation, &token, None).is_err());

        let other = SigningKey::new([0xff; KEY_LEN]);
        assert!(other.verify(ActionKind::PasswordRecovery, &token, Some("042917")).is_err());
    }

    #[test]
    fn test_verify_rejects_truncated_payload() {
        let token = key().sign(ActionKind::Activation, &secret(), None).unwrap();
        assert!(matches!(
            key().verify(ActionKind::Activation, &token[..40], None),
            Err(TokenError::Payload(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "SigningKey(..)");
    }
}
