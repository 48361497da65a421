//! Password hashing for the LOGIN handshake step (§4.2.1).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// `base64(sha256(lowercase(email) || password))`.
pub fn compute_hash(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.to_lowercase().as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_vector() {
        // Synthetic vector: sha256("user@example.com" || "hunter2"), base64.
        let hash = compute_hash("User@Example.com", "hunter2");
        assert_eq!(hash, "ToY0drbakxQZZEFqeYWp8DW7nDVeo3kYKbxEFf0vp4s=");
    }

    #[test]
    fn is_case_insensitive_on_email() {
        assert_eq!(compute_hash("a@b.com", "pw"), compute_hash("A@B.COM", "pw"));
    }

    #[test]
    fn is_case_sensitive_on_password() {
        assert_ne!(compute_hash("a@b.com", "pw"), compute_hash("a@b.com", "PW"));
    }
}
