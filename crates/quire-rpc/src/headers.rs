//! Protocol headers carried on every `/rpc` request and signed reply

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::Signature;

use crate::error::Rejection;

pub const METHOD: &str = "x-quire-method";
pub const TOKEN: &str = "x-quire-token";
/// Standard base64 of the 64-byte ed25519 signature over the raw body
pub const SIGNATURE: &str = "x-quire-signature";
/// Decimal u64
pub const SEQUENCE: &str = "x-quire-sequence";

pub fn text<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, Rejection> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(Rejection::Header(name))
}

pub fn sequence(headers: &HeaderMap) -> Result<u64, Rejection> {
    text(headers, SEQUENCE)?
        .parse()
        .map_err(|_| Rejection::Header(SEQUENCE))
}

pub fn signature(headers: &HeaderMap) -> Result<Signature, Rejection> {
    let raw = BASE64
        .decode(text(headers, SIGNATURE)?)
        .map_err(|_| Rejection::Header(SIGNATURE))?;
    Signature::from_slice(&raw).map_err(|_| Rejection::Header(SIGNATURE))
}

pub fn encode_signature(signature: &Signature) -> String {
    BASE64.encode(signature.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_sequence_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(sequence(&headers), Err(Rejection::Header(SEQUENCE)));

        headers.insert(SEQUENCE, HeaderValue::from_static("42"));
        assert_eq!(sequence(&headers), Ok(42));

        headers.insert(SEQUENCE, HeaderValue::from_static("-1"));
        assert_eq!(sequence(&headers), Err(Rejection::Header(SEQUENCE)));
    }

    #[test]
    fn test_signature_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE, HeaderValue::from_static("not base64!"));
        assert!(signature(&headers).is_err());

        let short = BASE64.encode([0u8; 10]);
        headers.insert(SIGNATURE, HeaderValue::from_str(&short).unwrap());
        assert!(signature(&headers).is_err());

        let sig = Signature::from_bytes(&[7u8; 64]);
        headers.insert(SIGNATURE, HeaderValue::from_str(&encode_signature(&sig)).unwrap());
        assert_eq!(signature(&headers).unwrap(), sig);
    }

    #[test]
    fn test_empty_header_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN, HeaderValue::from_static(""));
        assert_eq!(text(&headers, TOKEN), Err(Rejection::Header(TOKEN)));
    }
}
