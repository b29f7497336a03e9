//! Webhook signature verification
//!
//! Every provider signs with HMAC-SHA256; they differ in what is signed and
//! how the digest is encoded. Comparisons are constant-time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 digest of `parts` concatenated
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

/// Verify a base64-encoded signature
pub fn verify_base64(key: &[u8], parts: &[&[u8]], signature: &str) -> bool {
    let Ok(provided) = BASE64.decode(signature.trim()) else {
        return false;
    };
    constant_time_eq(&hmac_sha256(key, parts), &provided)
}

/// Verify a hex-encoded signature (case-insensitive)
pub fn verify_hex(key: &[u8], parts: &[&[u8]], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    constant_time_eq(&hmac_sha256(key, parts), &provided)
}

/// Produce a base64 signature; used by tests and local tooling
pub fn sign_base64(key: &[u8], parts: &[&[u8]]) -> String {
    BASE64.encode(hmac_sha256(key, parts))
}

/// Produce a hex signature; used by tests and local tooling
pub fn sign_hex(key: &[u8], parts: &[&[u8]]) -> String {
    hex::encode(hmac_sha256(key, parts))
}

fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    !expected.is_empty() && expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let digest = hmac_sha256(b"Jefe", &[b"what do ya want ", b"for nothing?"]);
        assert_eq!(
            hex::encode(digest),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn base64_and_hex_verification() {
        let key = b"signing-key";
        let body: &[u8] = br#"{"id":"1"}"#;

        let b64 = sign_base64(key, &[body]);
        assert!(verify_base64(key, &[body], &b64));
        assert!(!verify_base64(key, &[b"tampered"], &b64));
        assert!(!verify_base64(b"other-key", &[body], &b64));
        assert!(!verify_base64(key, &[body], "not base64!"));

        let hex_sig = sign_hex(key, &[body]).to_uppercase();
        assert!(verify_hex(key, &[body], &hex_sig));
        assert!(!verify_hex(key, &[body], &hex_sig[..10]));
    }
}
