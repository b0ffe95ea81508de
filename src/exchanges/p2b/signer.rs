use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{hmac_sha512_hex, require_credential};
use crate::core::kernel::{SignatureResult, SignedRequest, Signer};
use base64::engine::general_purpose;
use base64::Engine;
use secrecy::{ExposeSecret, Secret};
use serde_json::{Map, Value};

/// P2B request signer.
///
/// Auth data travels inside the body: the signer adds `request` (the path)
/// and `nonce` to the JSON object, re-serializes it with sorted keys, and
/// signs the base64 of that exact text. The rewritten body replaces the
/// caller's.
pub struct P2bSigner {
    api_key: String,
    secret_key: Secret<String>,
}

impl P2bSigner {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ExchangeError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        require_credential(&api_key, "p2b api key")?;
        require_credential(&secret_key, "p2b secret key")?;
        Ok(Self {
            api_key,
            secret_key: Secret::new(secret_key),
        })
    }

    fn augmented_body(endpoint: &str, body: &[u8], nonce: u64) -> Result<Vec<u8>, ExchangeError> {
        let mut object = if body.is_empty() {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body)? {
                Value::Object(object) => object,
                other => {
                    return Err(ExchangeError::InvalidParameters(format!(
                        "p2b request body must be a JSON object, got {other}"
                    )))
                }
            }
        };
        object.insert("request".to_string(), Value::from(endpoint));
        object.insert("nonce".to_string(), Value::from(nonce));
        Ok(serde_json::to_vec(&Value::Object(object))?)
    }
}

impl Signer for P2bSigner {
    fn sign_request(
        &self,
        _method: &str,
        endpoint: &str,
        _query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let body = Self::augmented_body(endpoint, body, timestamp)?;
        let payload = general_purpose::STANDARD.encode(&body);
        let signature = hmac_sha512_hex(self.secret_key.expose_secret().as_bytes(), payload.as_bytes())?;

        Ok(SignedRequest {
            body: Some(body),
            ..SignedRequest::with_headers([
                ("X-TXC-APIKEY", self.api_key.clone()),
                ("X-TXC-PAYLOAD", payload),
                ("X-TXC-SIGNATURE", signature),
            ])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 1_700_000_000_000;

    fn signer() -> P2bSigner {
        P2bSigner::new("api_key", "secret_key").unwrap()
    }

    #[test]
    fn test_body_gains_request_and_nonce() {
        let signed = signer()
            .sign_request("POST", "/api/v2/orders", "", br#"{"market":"ETH_BTC"}"#, TS)
            .unwrap();
        let body = signed.body.clone().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"market":"ETH_BTC","nonce":1700000000000,"request":"/api/v2/orders"}"#
        );
        assert_eq!(
            signed.headers["X-TXC-PAYLOAD"],
            "eyJtYXJrZXQiOiJFVEhfQlRDIiwibm9uY2UiOjE3MDAwMDAwMDAwMDAsInJlcXVlc3QiOiIvYXBpL3YyL29yZGVycyJ9"
        );
        assert_eq!(
            signed.headers["X-TXC-SIGNATURE"],
            "19b81b839f6f7aa7aa0c32e7450607056260b1cc191cfb55ec9bfc91643e050aca5a0edd6516285469e6c6446448e214769dd149da9a1db3efee187c0b971d5a"
        );
        assert_eq!(signed.headers["X-TXC-APIKEY"], "api_key");
    }

    #[test]
    fn test_empty_body_becomes_auth_object() {
        let signed = signer()
            .sign_request("POST", "/api/v2/account/balances", "", b"", TS)
            .unwrap();
        let body: Value = serde_json::from_slice(&signed.body.unwrap()).unwrap();
        assert_eq!(body["request"], "/api/v2/account/balances");
        assert_eq!(body["nonce"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_non_object_body_rejected() {
        assert!(signer().sign_request("POST", "/x", "", b"[1,2]", TS).is_err());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let a = signer().sign_request("POST", "/x", "", b"{}", TS).unwrap();
        let b = signer().sign_request("POST", "/x", "", b"{}", TS).unwrap();
        assert_eq!(a, b);
    }
}
