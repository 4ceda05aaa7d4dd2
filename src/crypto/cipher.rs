//! Block cipher encryption of `EncryptedData` payloads and RSA key transport.
//!
//! CBC ciphertexts are `IV || ciphertext` with ISO 10126 padding, GCM
//! ciphertexts are `IV || ciphertext || tag`, as XML Encryption requires.
//! Decryption errors carry no detail; callers mask them.

use crate::constants::{
    ALG_AES128, ALG_AES128_GCM, ALG_AES192, ALG_AES256, ALG_AES256_GCM, ALG_KEYTRANSPORT_RSA15,
    ALG_KEYTRANSPORT_RSAOAEP, ALG_KEYTRANSPORT_RSAOAEP_XENC11, ALG_MGF1_SHA1, ALG_MGF1_SHA256,
    ALG_SHA1, ALG_SHA256, ALG_TRIPLE_DES,
};
use crate::error::{ErrorCode, WssError, WssResult};
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;

const GCM_IV_LENGTH: usize = 12;

fn crypto_failure() -> WssError {
    WssError::masked()
}

/// Encrypt `plaintext` with a symmetric `algorithm`.
pub fn encrypt_data(algorithm: &str, key: &[u8], plaintext: &[u8]) -> WssResult<Vec<u8>> {
    match algorithm {
        ALG_AES128 => cbc_encrypt::<aes::Aes128>(key, plaintext, 16),
        ALG_AES192 => cbc_encrypt::<aes::Aes192>(key, plaintext, 16),
        ALG_AES256 => cbc_encrypt::<aes::Aes256>(key, plaintext, 16),
        ALG_TRIPLE_DES => cbc_encrypt::<des::TdesEde3>(key, plaintext, 8),
        ALG_AES128_GCM => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| invalid_key(algorithm))?;
            gcm_encrypt(&cipher, plaintext)
        }
        ALG_AES256_GCM => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| invalid_key(algorithm))?;
            gcm_encrypt(&cipher, plaintext)
        }
        other => Err(WssError::unsupported_algorithm(other)),
    }
}

/// Decrypt `data` produced by [`encrypt_data`].
pub fn decrypt_data(algorithm: &str, key: &[u8], data: &[u8]) -> WssResult<Vec<u8>> {
    match algorithm {
        ALG_AES128 => cbc_decrypt::<aes::Aes128>(key, data, 16),
        ALG_AES192 => cbc_decrypt::<aes::Aes192>(key, data, 16),
        ALG_AES256 => cbc_decrypt::<aes::Aes256>(key, data, 16),
        ALG_TRIPLE_DES => cbc_decrypt::<des::TdesEde3>(key, data, 8),
        ALG_AES128_GCM => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| crypto_failure())?;
            gcm_decrypt(&cipher, data)
        }
        ALG_AES256_GCM => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| crypto_failure())?;
            gcm_decrypt(&cipher, data)
        }
        other => Err(WssError::unsupported_algorithm(other)),
    }
}

fn invalid_key(algorithm: &str) -> WssError {
    WssError::new(
        ErrorCode::FailedEncryption,
        format!("Key length does not match {}", algorithm),
    )
}

fn cbc_encrypt<C>(key: &[u8], plaintext: &[u8], block: usize) -> WssResult<Vec<u8>>
where
    C: cbc::cipher::BlockEncryptMut + cbc::cipher::BlockCipher + cbc::cipher::KeyInit,
{
    let iv = super::random_bytes(block);
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, &iv)
        .map_err(|_| WssError::new(ErrorCode::FailedEncryption, "Invalid key or IV length"))?;

    // ISO 10126: random filler, last byte is the pad length
    let pad = block - plaintext.len() % block;
    let mut padded = plaintext.to_vec();
    padded.extend_from_slice(&super::random_bytes(pad - 1));
    padded.push(pad as u8);

    let ciphertext = encryptor.encrypt_padded_vec_mut::<NoPadding>(&padded);
    let mut out = iv;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn cbc_decrypt<C>(key: &[u8], data: &[u8], block: usize) -> WssResult<Vec<u8>>
where
    C: cbc::cipher::BlockDecryptMut + cbc::cipher::BlockCipher + cbc::cipher::KeyInit,
{
    if data.len() < 2 * block || data.len() % block != 0 {
        return Err(crypto_failure());
    }
    let (iv, ciphertext) = data.split_at(block);
    let decryptor =
        cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| crypto_failure())?;
    let mut plaintext = decryptor
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| crypto_failure())?;

    let pad = plaintext.last().copied().unwrap_or(0) as usize;
    if pad == 0 || pad > block || pad > plaintext.len() {
        return Err(crypto_failure());
    }
    plaintext.truncate(plaintext.len() - pad);
    Ok(plaintext)
}

fn gcm_encrypt<A: Aead>(cipher: &A, plaintext: &[u8]) -> WssResult<Vec<u8>> {
    let iv = super::random_bytes(GCM_IV_LENGTH);
    let ciphertext = cipher
        .encrypt(Nonce::<A>::from_slice(&iv), plaintext)
        .map_err(|_| WssError::new(ErrorCode::FailedEncryption, "GCM encryption failed"))?;
    let mut out = iv;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn gcm_decrypt<A: Aead>(cipher: &A, data: &[u8]) -> WssResult<Vec<u8>> {
    if data.len() < GCM_IV_LENGTH + 16 {
        return Err(crypto_failure());
    }
    let (iv, ciphertext) = data.split_at(GCM_IV_LENGTH);
    cipher
        .decrypt(Nonce::<A>::from_slice(iv), ciphertext)
        .map_err(|_| crypto_failure())
}

/// Key transport algorithm with its OAEP digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTransport {
    pub algorithm: String,
    /// `DigestMethod` of RSA-OAEP, SHA-1 when absent
    pub digest: Option<String>,
    /// `xenc11:MGF` of RSA-OAEP, MGF1-SHA1 when absent
    pub mgf: Option<String>,
}

impl KeyTransport {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            digest: None,
            mgf: None,
        }
    }

    fn oaep(&self) -> WssResult<Oaep> {
        let sha256_digest = match self.digest.as_deref() {
            None | Some(ALG_SHA1) => false,
            Some(ALG_SHA256) => true,
            Some(other) => return Err(WssError::unsupported_algorithm(other)),
        };
        let sha256_mgf = match self.mgf.as_deref() {
            None | Some(ALG_MGF1_SHA1) => false,
            Some(ALG_MGF1_SHA256) => true,
            Some(other) => return Err(WssError::unsupported_algorithm(other)),
        };
        Ok(match (sha256_digest, sha256_mgf) {
            (false, false) => Oaep::new::<Sha1>(),
            (false, true) => Oaep::new_with_mgf_hash::<Sha1, Sha256>(),
            (true, false) => Oaep::new_with_mgf_hash::<Sha256, Sha1>(),
            (true, true) => Oaep::new::<Sha256>(),
        })
    }
}

/// Wrap a symmetric key for `recipient`.
pub fn wrap_key(transport: &KeyTransport, recipient: &RsaPublicKey, key: &[u8]) -> WssResult<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let result = match transport.algorithm.as_str() {
        ALG_KEYTRANSPORT_RSA15 => recipient.encrypt(&mut rng, Pkcs1v15Encrypt, key),
        ALG_KEYTRANSPORT_RSAOAEP | ALG_KEYTRANSPORT_RSAOAEP_XENC11 => {
            recipient.encrypt(&mut rng, transport.oaep()?, key)
        }
        other => return Err(WssError::unsupported_algorithm(other)),
    };
    result.map_err(|e| WssError::new(ErrorCode::FailedEncryption, format!("Key wrap failed: {}", e)))
}

/// Unwrap a transported key. Failures carry no detail.
pub fn unwrap_key(transport: &KeyTransport, private: &RsaPrivateKey, wrapped: &[u8]) -> WssResult<Vec<u8>> {
    let result = match transport.algorithm.as_str() {
        ALG_KEYTRANSPORT_RSA15 => private.decrypt(Pkcs1v15Encrypt, wrapped),
        ALG_KEYTRANSPORT_RSAOAEP | ALG_KEYTRANSPORT_RSAOAEP_XENC11 => {
            private.decrypt(transport.oaep()?, wrapped)
        }
        other => return Err(WssError::unsupported_algorithm(other)),
    };
    result.map_err(|_| crypto_failure())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::test_keys::rsa_key;
    use crate::crypto::generate_symmetric_key;

    #[test]
    fn test_symmetric_round_trips() {
        let plaintext = b"<m:Echo xmlns:m=\"urn:m\">hello</m:Echo>";
        for algorithm in [ALG_AES128, ALG_AES192, ALG_AES256, ALG_TRIPLE_DES, ALG_AES128_GCM, ALG_AES256_GCM] {
            let key = generate_symmetric_key(algorithm).unwrap();
            let ciphertext = encrypt_data(algorithm, &key, plaintext).unwrap();
            assert_eq!(decrypt_data(algorithm, &key, &ciphertext).unwrap(), plaintext, "{}", algorithm);
        }
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() {
        let key = generate_symmetric_key(ALG_AES128_GCM).unwrap();
        let other = generate_symmetric_key(ALG_AES128_GCM).unwrap();
        let ciphertext = encrypt_data(ALG_AES128_GCM, &key, b"secret").unwrap();
        let err = decrypt_data(ALG_AES128_GCM, &other, &ciphertext).unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedCheck);
    }

    #[test]
    fn test_truncated_cbc_rejected() {
        let key = generate_symmetric_key(ALG_AES256).unwrap();
        assert!(decrypt_data(ALG_AES256, &key, &[0u8; 20]).is_err());
    }

    #[test]
    fn test_key_transport_round_trips() {
        let private = rsa_key(0);
        let public = private.to_public_key();
        let key = generate_symmetric_key(ALG_AES256).unwrap();

        let mut oaep_sha256 = KeyTransport::new(ALG_KEYTRANSPORT_RSAOAEP_XENC11);
        oaep_sha256.digest = Some(ALG_SHA256.to_string());
        oaep_sha256.mgf = Some(ALG_MGF1_SHA256.to_string());

        for transport in [
            KeyTransport::new(ALG_KEYTRANSPORT_RSAOAEP),
            KeyTransport::new(ALG_KEYTRANSPORT_RSA15),
            oaep_sha256,
        ] {
            let wrapped = wrap_key(&transport, &public, &key).unwrap();
            assert_eq!(unwrap_key(&transport, &private, &wrapped).unwrap(), key);
        }
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let key = generate_symmetric_key(ALG_AES128).unwrap();
        let transport = KeyTransport::new(ALG_KEYTRANSPORT_RSAOAEP);
        let wrapped = wrap_key(&transport, &rsa_key(0).to_public_key(), &key).unwrap();
        assert!(unwrap_key(&transport, &rsa_key(1), &wrapped).is_err());
    }
}
