//! PKCE (RFC 7636) challenge verification, S256 only.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The single supported challenge method.
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// base64url(SHA-256) of 32 bytes is always 43 chars unpadded.
const CHALLENGE_LEN: usize = 43;

const VERIFIER_MIN_LEN: usize = 43;
const VERIFIER_MAX_LEN: usize = 128;

/// RFC 7636 2.3: verifier is 43..=128 unreserved characters.
pub fn verifier_format_ok(verifier: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Shape check applied when the challenge is first stored.
pub fn challenge_format_ok(challenge: &str) -> bool {
    challenge.len() == CHALLENGE_LEN
        && challenge
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

/// Recompute base64url(SHA-256(verifier)) and compare against the stored
/// challenge byte-for-byte in constant time. Any mismatch fails closed.
pub fn verify_code_challenge(verifier: &str, stored_challenge: &str) -> bool {
    if !verifier_format_ok(verifier) {
        return false;
    }

    let digest = Sha256::digest(verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(digest);

    computed.as_bytes().ct_eq(stored_challenge.as_bytes()).into()
}

/// Derive the S256 challenge for a verifier. Test and tooling helper.
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
