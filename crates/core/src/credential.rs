//! Credential hashing.
//!
//! Stored form: `sha256$<salt>$<digest>` with both parts base64 encoded. Rows
//! written before hashing hold the plain value and are compared verbatim.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hashes a trimmed password candidate with a fresh random salt.
pub fn hash_credential(candidate: &str) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let hashed = digest(&salt, candidate.trim());
    format!("{}${}${}", SCHEME, STANDARD.encode(salt), STANDARD.encode(hashed))
}

/// Trimmed, case-sensitive comparison of a candidate against the stored value.
pub fn verify_credential(stored: &str, candidate: &str) -> bool {
    let stored = stored.trim();
    let candidate = candidate.trim();

    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(SCHEME), Some(salt), Some(expected)) => {
            let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt), STANDARD.decode(expected))
            else {
                tracing::warn!("Stored credential hash is corrupt; rejecting login");
                return false;
            };
            constant_time_eq(&digest(&salt, candidate), &expected)
        }
        _ => !stored.is_empty() && constant_time_eq(stored.as_bytes(), candidate.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_salted() {
        let a = hash_credential("abc");
        let b = hash_credential("abc");
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$"));
        assert!(!a.contains("abc"));
    }

    #[test]
    fn test_verify_trims_and_is_case_sensitive() {
        let stored = hash_credential("Pass1 ");
        assert!(verify_credential(&stored, "Pass1"));
        assert!(verify_credential(&stored, "  Pass1"));
        assert!(!verify_credential(&stored, "pass1"));
        assert!(!verify_credential(&stored, ""));
    }

    #[test]
    fn test_verify_plain_legacy_value() {
        assert!(verify_credential("Pass1 ", "Pass1"));
        assert!(!verify_credential("Pass1", "PASS1"));
        assert!(!verify_credential("", ""));
    }

    #[test]
    fn test_corrupt_hash_rejects() {
        assert!(!verify_credential("sha256$***$***", "anything"));
    }
}
