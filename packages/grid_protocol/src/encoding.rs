//! Base64 helpers for token segments and password digests.

use data_encoding::{BASE64, BASE64URL_NOPAD};

/// URL-safe base64, unpadded.
pub fn base64url_encode(bytes: &[u8]) -> String {
    BASE64URL_NOPAD.encode(bytes)
}

/// Decode URL-safe base64. Trailing padding is tolerated.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    BASE64URL_NOPAD.decode(s.trim_end_matches('=').as_bytes())
}

/// Digest sent in place of the clear-text password on login.
///
/// Standard padded base64 of the UTF-8 bytes; hashing policy belongs to the backend.
pub fn password_digest(password: &str) -> String {
    BASE64.encode(password.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_roundtrip() {
        let data = b"{\"alg\":\"HS512\"}";
        let encoded = base64url_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(base64url_decode(&encoded).unwrap(), data.to_vec());
    }

    #[test]
    fn padded_input_decodes() {
        assert_eq!(base64url_decode("YQ==").unwrap(), b"a".to_vec());
    }

    #[test]
    fn digest_is_standard_base64() {
        assert_eq!(password_digest("root"), "cm9vdA==");
        assert_eq!(password_digest(""), "");
    }
}
