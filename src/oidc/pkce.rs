//! Random tokens and PKCE helpers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy in a PKCE code verifier (64 URL-safe characters).
const CODE_VERIFIER_BYTES: usize = 48;

/// Generates `len` cryptographically random bytes encoded as URL-safe base64
/// without padding.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a PKCE code verifier (RFC 7636, 43-128 characters).
pub fn generate_code_verifier() -> String {
    random_token(CODE_VERIFIER_BYTES)
}

/// Computes the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_is_url_safe() {
        let token = random_token(32);
        // 32 bytes -> 43 characters without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_random_tokens_differ() {
        assert_ne!(random_token(32), random_token(32));
    }

    #[test]
    fn test_code_verifier_length() {
        assert_eq!(generate_code_verifier().len(), 64);
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
