use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 request signer. The secret never leaves this struct.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(secret: &str) -> Result<Self, ExchangeError> {
        let mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ExchangeError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Lowercase hex digest of the query string
    pub fn sign(&self, query: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(<redacted>)")
    }
}
