//! Thin wrappers over the RustCrypto primitives used by the processors.

pub mod cipher;
pub mod signature;
pub mod suite;

pub use cipher::{decrypt_data, encrypt_data, unwrap_key, wrap_key, KeyTransport};
pub use signature::{sign, verify, SigningKey, VerifyingKey};
pub use suite::AlgorithmSuite;

use crate::constants::{
    ALG_AES128, ALG_AES128_GCM, ALG_AES192, ALG_AES256, ALG_AES256_GCM, ALG_HMAC_SHA1,
    ALG_HMAC_SHA256, ALG_SHA1, ALG_SHA256, ALG_TRIPLE_DES,
};
use crate::error::{WssError, WssResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Symmetric algorithms accepted for `EncryptedData`.
pub const PERMITTED_DATA_ALGORITHMS: &[&str] = &[
    ALG_TRIPLE_DES,
    ALG_AES128,
    ALG_AES256,
    ALG_AES128_GCM,
    ALG_AES256_GCM,
];

/// Key length in bytes for a symmetric encryption or HMAC algorithm.
pub fn symmetric_key_length(algorithm: &str) -> WssResult<usize> {
    match algorithm {
        ALG_AES128 | ALG_AES128_GCM => Ok(16),
        ALG_AES192 | ALG_TRIPLE_DES => Ok(24),
        ALG_AES256 | ALG_AES256_GCM => Ok(32),
        ALG_HMAC_SHA1 => Ok(20),
        ALG_HMAC_SHA256 => Ok(32),
        other => Err(WssError::unsupported_algorithm(other)),
    }
}

pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Fresh key for `algorithm`.
pub fn generate_symmetric_key(algorithm: &str) -> WssResult<Vec<u8>> {
    Ok(random_bytes(symmetric_key_length(algorithm)?))
}

/// Message digest by algorithm URI.
pub fn digest(algorithm: &str, data: &[u8]) -> WssResult<Vec<u8>> {
    match algorithm {
        ALG_SHA1 => Ok(Sha1::digest(data).to_vec()),
        ALG_SHA256 => Ok(Sha256::digest(data).to_vec()),
        other => Err(WssError::unsupported_algorithm(other)),
    }
}

pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 text, ignoring embedded whitespace.
pub fn base64_decode(text: &str) -> WssResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(BASE64.decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lengths() {
        assert_eq!(symmetric_key_length(ALG_AES256_GCM).unwrap(), 32);
        assert_eq!(symmetric_key_length(ALG_TRIPLE_DES).unwrap(), 24);
        assert!(symmetric_key_length("urn:none").is_err());
    }

    #[test]
    fn test_base64_ignores_line_breaks() {
        let encoded = base64_encode(b"hello world, hello world");
        let wrapped = format!("{}\n  {}", &encoded[..10], &encoded[10..]);
        assert_eq!(base64_decode(&wrapped).unwrap(), b"hello world, hello world");
    }

    #[test]
    fn test_digest_algorithms() {
        assert_eq!(digest(ALG_SHA1, b"x").unwrap().len(), 20);
        assert_eq!(digest(ALG_SHA256, b"x").unwrap().len(), 32);
    }
}
