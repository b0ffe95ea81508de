use crate::core::errors::ExchangeError;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;

/// Everything a signer adds to (or replaces in) an outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedRequest {
    pub headers: HashMap<String, String>,
    /// Extra query parameters appended after the caller's own
    pub query: Vec<(String, String)>,
    /// Replacement body for schemes that embed auth data in the payload
    pub body: Option<Vec<u8>>,
}

impl SignedRequest {
    pub fn with_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }
}

pub type SignatureResult = Result<SignedRequest, ExchangeError>;

/// Signer trait for request authentication
///
/// Implementations are pure: the same credential, timestamp and request
/// content always produce the same output, and nothing shared is mutated.
/// Credential problems are reported by the constructors, never per request.
pub trait Signer: Send + Sync {
    /// Sign a REST request
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path, without the base URL
    /// * `query_string` - Query string (without leading '?')
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;

    /// Login frame for exchanges whose private socket authenticates in-band.
    fn sign_ws_login(&self, _timestamp: u64) -> Result<Option<Value>, ExchangeError> {
        Ok(None)
    }
}

pub(crate) fn require_credential(value: &str, name: &str) -> Result<(), ExchangeError> {
    if value.trim().is_empty() {
        return Err(ExchangeError::AuthError(format!("{name} must not be empty")));
    }
    Ok(())
}

pub fn hmac_sha256(secret: &[u8], payload: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> Result<String, ExchangeError> {
    hmac_sha256(secret, payload).map(hex::encode)
}

pub fn hmac_sha256_base64(secret: &[u8], payload: &[u8]) -> Result<String, ExchangeError> {
    hmac_sha256(secret, payload).map(|bytes| general_purpose::STANDARD.encode(bytes))
}

pub fn hmac_sha512_hex(secret: &[u8], payload: &[u8]) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret)
        .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha1_base64(secret: &[u8], payload: &[u8]) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret)
        .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
    mac.update(payload);
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2
    #[test]
    fn test_hmac_sha256_known_vector() {
        let digest = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(hmac_sha512_hex(b"k", b"p").unwrap().len(), 128);
        // 20 byte SHA-1 digest -> 28 base64 chars
        assert_eq!(hmac_sha1_base64(b"k", b"p").unwrap().len(), 28);
        assert_eq!(hmac_sha256_base64(b"k", b"p").unwrap().len(), 44);
    }

    #[test]
    fn test_empty_credential_rejected() {
        assert!(require_credential("  ", "api key").is_err());
        assert!(require_credential("abc", "api key").is_ok());
    }
}
