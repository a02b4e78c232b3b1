use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value)
}

/// URL safe random string carrying `bytes` bytes of entropy
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    encode_base64(buf)
}

/// PKCE S256 challenge of a code verifier
pub fn pkce_challenge(verifier: &str) -> String {
    encode_base64(Sha256::digest(verifier.as_bytes()))
}

#[test]
fn test_pkce_challenge() {
    // RFC 7636, appendix B
    assert_eq!(
        pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
        "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
    );
}

#[test]
fn test_random_token() {
    let a = random_token(32);
    let b = random_token(32);
    assert_ne!(a, b);
    assert_eq!(a.len(), 43);
    assert_eq!(decode_base64(&a).unwrap().len(), 32);
}
