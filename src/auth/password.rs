//! PBKDF2 password hashing.
//!
//! Encoded form:
//!
//! ```text
//! pbkdf2$sha256$<iterations hex>$<salt length>$<salt b64>$<digest b64>
//! ```
//!
//! Verification re-derives and compares in constant time. The iteration
//! count is bounded on verify so a crafted hash cannot turn a login
//! attempt into unbounded KDF work.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2";
const DIGEST: &str = "sha256";
const ITERATIONS: u32 = 10_000;
const MAX_ITERATIONS: u32 = 1_000_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

fn derive(plaintext: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt, iterations, &mut out);
    out
}

/// Hash a plaintext password with a fresh random salt.
#[must_use]
pub fn hash(plaintext: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = derive(plaintext, &salt, ITERATIONS);
    format!(
        "{SCHEME}${DIGEST}${ITERATIONS:x}${SALT_LEN}${}${}",
        BASE64.encode(salt),
        BASE64.encode(digest)
    )
}

/// Verify a plaintext password against an encoded hash.
///
/// Malformed encodings verify as false, never panic.
#[must_use]
pub fn is_valid(encoded: &str, plaintext: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, digest_name, iterations_hex, salt_len, salt_b64, digest_b64] = parts[..] else {
        return false;
    };
    if scheme != SCHEME || digest_name != DIGEST {
        return false;
    }
    let Ok(iterations) = u32::from_str_radix(iterations_hex, 16) else {
        return false;
    };
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return false;
    }
    let Ok(salt) = BASE64.decode(salt_b64) else {
        return false;
    };
    if salt_len.parse::<usize>() != Ok(salt.len()) {
        return false;
    }
    let Ok(expected) = BASE64.decode(digest_b64) else {
        return false;
    };
    if expected.len() != KEY_LEN {
        return false;
    }

    let actual = derive(plaintext, &salt, iterations);
    actual.ct_eq(&expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let encoded = hash("Welcome!");
        assert!(is_valid(&encoded, "Welcome!"));
        assert!(!is_valid(&encoded, "welcome!"));
        assert!(!is_valid(&encoded, ""));
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash("same"), hash("same"));
    }

    #[test]
    fn encoded_shape() {
        let encoded = hash("x");
        let parts: Vec<&str> = encoded.split('$').collect();
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0], "pbkdf2");
        assert_eq!(parts[1], "sha256");
        assert_eq!(parts[3], "16");
    }

    #[test]
    fn rfc_test_vector() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1 iteration, 32 bytes)
        let digest =
            hex::decode("120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b")
                .unwrap();
        let encoded = format!(
            "pbkdf2$sha256$1$4${}${}",
            BASE64.encode("salt"),
            BASE64.encode(digest)
        );
        assert!(is_valid(&encoded, "password"));
        assert!(!is_valid(&encoded, "passw0rd"));
    }

    #[test]
    fn malformed_encodings_are_invalid() {
        assert!(!is_valid("", "x"));
        assert!(!is_valid("pbkdf2$sha256$10", "x"));
        assert!(!is_valid("bcrypt$sha256$1$4$c2FsdA==$AAAA", "x"));
        assert!(!is_valid("pbkdf2$sha256$zz$4$c2FsdA==$AAAA", "x"));
        assert!(!is_valid("pbkdf2$sha256$1$99$c2FsdA==$AAAA", "x"));
    }

    #[test]
    fn excessive_iteration_count_is_rejected() {
        let encoded = format!(
            "pbkdf2$sha256$ffffffff$4${}${}",
            BASE64.encode("salt"),
            BASE64.encode([0u8; 32])
        );
        assert!(!is_valid(&encoded, "password"));
    }
}
