use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{hmac_sha1_base64, hmac_sha256_base64, require_credential};
use crate::core::kernel::{SignatureResult, SignedRequest, Signer};
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};

const WS_LOGIN_PATH: &str = "/api/login";

/// UZX signer. REST requests carry a header signature over the key, secret
/// and a seconds timestamp; the request itself is not part of the payload.
pub struct UzxSigner {
    api_key: String,
    secret_key: Secret<String>,
}

impl UzxSigner {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ExchangeError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        require_credential(&api_key, "uzx api key")?;
        require_credential(&secret_key, "uzx secret key")?;
        Ok(Self {
            api_key,
            secret_key: Secret::new(secret_key),
        })
    }

    fn secret(&self) -> &[u8] {
        self.secret_key.expose_secret().as_bytes()
    }
}

impl Signer for UzxSigner {
    fn sign_request(
        &self,
        _method: &str,
        _endpoint: &str,
        _query_string: &str,
        _body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let seconds = (timestamp / 1000).to_string();
        let payload = format!(
            "{}\n{}\n{}",
            self.api_key,
            self.secret_key.expose_secret(),
            seconds
        );
        let signature = hmac_sha1_base64(self.secret(), payload.as_bytes())?;

        Ok(SignedRequest::with_headers([
            ("apiKey", self.api_key.clone()),
            ("signature", signature),
            ("timestamp", seconds),
        ]))
    }

    fn sign_ws_login(&self, timestamp: u64) -> Result<Option<Value>, ExchangeError> {
        let seconds = (timestamp / 1000).to_string();
        let sign = hmac_sha256_base64(
            self.secret(),
            format!("{seconds}GET{WS_LOGIN_PATH}").as_bytes(),
        )?;
        Ok(Some(json!({
            "event": "login",
            "params": {
                "type": "api",
                "apiKey": self.api_key,
                "timestamp": seconds,
                "sign": sign,
            }
        })))
    }
}
