// Authorization: <scheme> <key>:<nonce>:<hex(HMAC-SHA256(secret, nonce + method + path?query + body))>

use std::str::FromStr;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::market_data::nonce::NonceCounter;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_ENV: &str = "BITSO_API_KEY";
pub const API_SECRET_ENV: &str = "BITSO_API_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("unsupported HTTP method {0:?}")]
    UnsupportedMethod(String),
    #[error("secret cannot be used as an HMAC key")]
    InvalidKey,
}

#[derive(Clone)]
pub struct Credential {
    key: String,
    secret: String,
}

impl Credential {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, SigningError> {
        let (key, secret) = (key.into(), secret.into());
        if key.trim().is_empty() {
            return Err(SigningError::MissingCredential(API_KEY_ENV));
        }
        if secret.trim().is_empty() {
            return Err(SigningError::MissingCredential(API_SECRET_ENV));
        }
        Ok(Self { key, secret })
    }

    pub fn from_env() -> Result<Self, SigningError> {
        let key = std::env::var(API_KEY_ENV).map_err(|_| SigningError::MissingCredential(API_KEY_ENV))?;
        let secret = std::env::var(API_SECRET_ENV).map_err(|_| SigningError::MissingCredential(API_SECRET_ENV))?;
        Self::new(key, secret)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(SigningError::UnsupportedMethod(other.to_string())),
        }
    }
}

pub fn signing_payload(nonce: u64, method: HttpMethod, path_with_query: &str, body: &str) -> String {
    format!("{}{}{}{}", nonce, method.as_str(), path_with_query, body)
}

/// Lowercase hex HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &str, payload: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::InvalidKey)?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signs requests for one credential. Clones share the nonce counter.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credential: Credential,
    scheme: String,
    nonces: Arc<NonceCounter>,
}

impl RequestSigner {
    pub fn new(credential: Credential, scheme: &str, nonces: Arc<NonceCounter>) -> Self {
        Self { credential, scheme: scheme.to_string(), nonces }
    }

    /// Draws a fresh nonce and returns the full `Authorization` header value.
    pub fn authorization(&self, method: HttpMethod, path_with_query: &str, body: &str) -> Result<String, SigningError> {
        let nonce = self.nonces.next();
        self.authorization_with_nonce(nonce, method, path_with_query, body)
    }

    pub fn authorization_with_nonce(
        &self,
        nonce: u64,
        method: HttpMethod,
        path_with_query: &str,
        body: &str,
    ) -> Result<String, SigningError> {
        let payload = signing_payload(nonce, method, path_with_query, body);
        let signature = sign_payload(&self.credential.secret, &payload)?;
        Ok(format!("{} {}:{}:{}", self.scheme, self.credential.key, nonce, signature))
    }
}
