pub mod password;
pub mod pkce;
pub mod request_context;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use request_context::RequestContext;
pub use validation::ValidatedJson;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate `n_bytes` of CSPRNG entropy, hex encoded.
pub fn random_hex_token(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest. Used to derive storage keys for refresh tokens and
/// OTP codes so the raw values never touch the database.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_length_and_uniqueness() {
        let a = random_hex_token(16);
        let b = random_hex_token(16);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
