use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a hex-encoded HMAC-SHA256 signature over `payload`.
///
/// Payment gateways sign the exact bytes they put on the wire, so callers
/// must pass the untouched request body here - never a re-serialization of
/// a parsed value, which is not guaranteed to be byte-identical.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

/// Verify a hex-encoded HMAC-SHA256 signature using constant-time comparison.
///
/// A mismatch is a `false` return, not an error; only an unusable key
/// errors.
pub fn verify_hmac_sha256(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = hmac_sha256_hex(secret, payload)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let secret = "my_secret_key";
        let body = br#"{"event":"payment.captured","payload":{}}"#;

        let signature = hmac_sha256_hex(secret, body).unwrap();
        assert!(!signature.is_empty());

        assert!(verify_hmac_sha256(secret, body, &signature).unwrap());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let secret = "my_secret_key";
        let body = br#"{"amount":50000}"#;
        let signature = hmac_sha256_hex(secret, body).unwrap();

        // one altered digit in the amount
        let tampered = br#"{"amount":50001}"#;
        assert!(!verify_hmac_sha256(secret, tampered, &signature).unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"amount":50000}"#;
        let signature = hmac_sha256_hex("secret-a", body).unwrap();

        assert!(!verify_hmac_sha256("secret-b", body, &signature).unwrap());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let secret = "my_secret_key";
        let body = br#"{"amount":50000}"#;
        let signature = hmac_sha256_hex(secret, body).unwrap();

        assert!(!verify_hmac_sha256(secret, body, &signature[..10]).unwrap());
    }
}
