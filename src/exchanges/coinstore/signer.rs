use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{hmac_sha256_hex, require_credential};
use crate::core::kernel::{SignatureResult, SignedRequest, Signer};
use secrecy::{ExposeSecret, Secret};

/// The derived signing key rotates every 30 seconds.
const KEY_WINDOW_MS: u64 = 30_000;

/// Coinstore request signer.
///
/// The secret never signs a payload directly: it first signs the current
/// 30 second window, and the hex digest of that becomes the HMAC key for
/// the request payload (query string for GET, raw body otherwise).
pub struct CoinstoreSigner {
    api_key: String,
    secret_key: Secret<String>,
}

impl CoinstoreSigner {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ExchangeError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        require_credential(&api_key, "coinstore api key")?;
        require_credential(&secret_key, "coinstore secret key")?;
        Ok(Self {
            api_key,
            secret_key: Secret::new(secret_key),
        })
    }

    fn derived_key(&self, timestamp: u64) -> Result<String, ExchangeError> {
        let window = (timestamp / KEY_WINDOW_MS).to_string();
        hmac_sha256_hex(self.secret_key.expose_secret().as_bytes(), window.as_bytes())
    }

    pub fn signature(&self, payload: &[u8], timestamp: u64) -> Result<String, ExchangeError> {
        let key = self.derived_key(timestamp)?;
        hmac_sha256_hex(key.as_bytes(), payload)
    }
}

impl Signer for CoinstoreSigner {
    fn sign_request(
        &self,
        method: &str,
        _endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let payload = if method.eq_ignore_ascii_case("GET") {
            query_string.as_bytes()
        } else {
            body
        };
        let signature = self.signature(payload, timestamp)?;

        Ok(SignedRequest::with_headers([
            ("X-CS-APIKEY", self.api_key.clone()),
            ("X-CS-EXPIRES", timestamp.to_string()),
            ("X-CS-SIGN", signature),
        ]))
    }
}
