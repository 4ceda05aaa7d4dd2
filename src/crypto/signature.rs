//! RSA and HMAC signatures over canonical `SignedInfo` bytes.

use crate::constants::{ALG_HMAC_SHA1, ALG_HMAC_SHA256, ALG_RSA_SHA1, ALG_RSA_SHA256};
use crate::error::{ErrorCode, WssError, WssResult};
use hmac::{Hmac, Mac};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub enum SigningKey<'a> {
    Rsa(&'a RsaPrivateKey),
    Hmac(&'a [u8]),
}

pub enum VerifyingKey<'a> {
    Rsa(&'a RsaPublicKey),
    Hmac(&'a [u8]),
}

/// Whether `algorithm` is an HMAC signature method.
pub fn is_hmac(algorithm: &str) -> bool {
    algorithm == ALG_HMAC_SHA1 || algorithm == ALG_HMAC_SHA256
}

pub fn sign(algorithm: &str, key: SigningKey<'_>, data: &[u8]) -> WssResult<Vec<u8>> {
    let failed = |e: String| WssError::new(ErrorCode::FailedSignature, format!("Signing failed: {}", e));
    match (algorithm, key) {
        (ALG_RSA_SHA1, SigningKey::Rsa(private)) => private
            .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data))
            .map_err(|e| failed(e.to_string())),
        (ALG_RSA_SHA256, SigningKey::Rsa(private)) => private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
            .map_err(|e| failed(e.to_string())),
        (ALG_HMAC_SHA1, SigningKey::Hmac(secret)) => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret).map_err(|e| failed(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        (ALG_HMAC_SHA256, SigningKey::Hmac(secret)) => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|e| failed(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        (ALG_RSA_SHA1 | ALG_RSA_SHA256 | ALG_HMAC_SHA1 | ALG_HMAC_SHA256, _) => Err(WssError::new(
            ErrorCode::FailedSignature,
            format!("Key type does not match {}", algorithm),
        )),
        (other, _) => Err(WssError::unsupported_algorithm(other)),
    }
}

/// Verify a signature. Any mismatch is reported as the masked failure.
pub fn verify(algorithm: &str, key: VerifyingKey<'_>, data: &[u8], signature: &[u8]) -> WssResult<()> {
    let ok = match (algorithm, key) {
        (ALG_RSA_SHA1, VerifyingKey::Rsa(public)) => public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), signature)
            .is_ok(),
        (ALG_RSA_SHA256, VerifyingKey::Rsa(public)) => public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data), signature)
            .is_ok(),
        (ALG_HMAC_SHA1, VerifyingKey::Hmac(secret)) => match Hmac::<Sha1>::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        },
        (ALG_HMAC_SHA256, VerifyingKey::Hmac(secret)) => match Hmac::<Sha256>::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        },
        (ALG_RSA_SHA1 | ALG_RSA_SHA256 | ALG_HMAC_SHA1 | ALG_HMAC_SHA256, _) => false,
        (other, _) => return Err(WssError::unsupported_algorithm(other)),
    };
    if ok {
        Ok(())
    } else {
        Err(WssError::masked())
    }
}
