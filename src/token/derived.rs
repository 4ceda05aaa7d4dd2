//! Key derivation: WS-SecureConversation P_SHA1 and the UsernameToken
//! Profile 1.1 password derivation.

use crate::constants::{DEFAULT_DERIVED_KEY_LABEL, NS_P_SHA1_0502, NS_P_SHA1_13};
use crate::error::{ErrorCode, WssError, WssResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Parameters of a `DerivedKeyToken`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeyParams {
    pub algorithm: String,
    pub label: String,
    pub nonce: Vec<u8>,
    pub offset: usize,
    pub length: usize,
    pub generation: Option<usize>,
}

impl DerivedKeyParams {
    pub fn new(nonce: Vec<u8>, length: usize) -> Self {
        Self {
            algorithm: NS_P_SHA1_0502.to_string(),
            label: DEFAULT_DERIVED_KEY_LABEL.to_string(),
            nonce,
            offset: 0,
            length,
            generation: None,
        }
    }

    /// Effective offset: `Generation` wins over `Offset` when present.
    pub fn effective_offset(&self) -> usize {
        match self.generation {
            Some(generation) => generation * self.length,
            None => self.offset,
        }
    }

    pub fn derive(&self, secret: &[u8]) -> WssResult<Vec<u8>> {
        if self.algorithm != NS_P_SHA1_0502 && self.algorithm != NS_P_SHA1_13 {
            return Err(WssError::unsupported_algorithm(&self.algorithm));
        }
        if self.length == 0 {
            return Err(WssError::new(
                ErrorCode::InvalidSecurityToken,
                "Derived key length must be positive",
            ));
        }
        let mut seed = self.label.as_bytes().to_vec();
        seed.extend_from_slice(&self.nonce);
        p_sha1(secret, &seed, self.effective_offset(), self.length)
    }
}

/// P_SHA1 (RFC 2246 P_hash with HMAC-SHA1), returning `length` bytes
/// starting at `offset` of the output stream.
pub fn p_sha1(secret: &[u8], seed: &[u8], offset: usize, length: usize) -> WssResult<Vec<u8>> {
    let total = offset + length;
    let mut output = Vec::with_capacity(total + 20);
    let mut a = seed.to_vec();

    while output.len() < total {
        a = hmac_sha1(secret, &a)?;
        let mut input = a.clone();
        input.extend_from_slice(seed);
        output.extend_from_slice(&hmac_sha1(secret, &input)?);
    }

    Ok(output[offset..total].to_vec())
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> WssResult<Vec<u8>> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|_| WssError::new(ErrorCode::Failure, "Invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// UsernameToken 1.1 key: SHA-1 over password + salt, re-hashed
/// `iterations - 1` more times.
pub fn username_token_key(password: &str, salt: &[u8], iterations: usize) -> Vec<u8> {
    let mut input = password.as_bytes().to_vec();
    input.extend_from_slice(salt);
    let mut key = Sha1::digest(&input).to_vec();
    for _ in 1..iterations.max(1) {
        key = Sha1::digest(&key).to_vec();
    }
    key
}

/// `Base64(SHA-1(nonce + created + password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}
