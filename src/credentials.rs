//! Credential resolution: certificates, private keys and passwords.
//!
//! Keystores are external to message processing; the processors only see
//! the [`CredentialResolver`] and [`PasswordCallback`] capabilities. The
//! in-memory implementations here back the binary and the tests.

use crate::config::{CredentialEntryConfig, CredentialsConfig, SecretConfig};
use crate::error::{ErrorCode, WssError, WssResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;

/// An X.509 certificate as seen by the processors. The encoding is kept
/// opaque; the fields below are what the lookups need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub encoded: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub subject_key_identifier: Option<Vec<u8>>,
    pub public_key: RsaPublicKey,
}

impl Certificate {
    /// SHA-1 over the encoded certificate.
    pub fn thumbprint(&self) -> Vec<u8> {
        Sha1::digest(&self.encoded).to_vec()
    }

    /// Public key size in bits.
    pub fn key_bits(&self) -> usize {
        use rsa::traits::PublicKeyParts;
        self.public_key.size() * 8
    }
}

/// Certificate lookup criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoType {
    Alias(String),
    IssuerSerial { issuer: String, serial: String },
    SubjectKeyIdentifier(Vec<u8>),
    Thumbprint(Vec<u8>),
}

/// What a password callback is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackUsage {
    /// Password protecting a private key
    PrivateKey,
    /// Password of a UsernameToken user
    UsernameToken,
    /// Shared secret of a token referenced by identifier
    SecretKey,
    /// Secret and issuer of a SecurityContextToken
    SecurityContextToken,
}

/// Answer of a [`PasswordCallback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordCredential {
    pub password: Option<String>,
    pub key: Option<Vec<u8>>,
    pub issuer: Option<String>,
}

/// Supplies passwords and shared secrets.
pub trait PasswordCallback: Send + Sync {
    fn resolve(&self, identifier: &str, usage: CallbackUsage) -> Option<PasswordCredential>;
}

/// Keystore abstraction shared read-only across messages.
pub trait CredentialResolver: Send + Sync {
    /// Private key belonging to `certificate`.
    fn get_private_key(
        &self,
        certificate: &Certificate,
        callback: &dyn PasswordCallback,
    ) -> WssResult<RsaPrivateKey>;

    /// Certificates matching `criteria`, possibly none.
    fn get_x509_certificates(&self, criteria: &CryptoType) -> WssResult<Vec<Certificate>>;

    /// Decode certificate bytes taken from a message.
    fn load_certificate(&self, encoded: &[u8]) -> WssResult<Certificate>;
}

struct CredentialEntry {
    alias: String,
    certificate: Certificate,
    private_key: Option<RsaPrivateKey>,
    password: Option<String>,
}

/// In-memory keystore.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Vec<CredentialEntry>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. A password, when set, must be returned by the callback
    /// before the private key is released.
    pub fn add(
        &mut self,
        alias: impl Into<String>,
        certificate: Certificate,
        private_key: Option<RsaPrivateKey>,
        password: Option<String>,
    ) {
        self.entries.push(CredentialEntry {
            alias: alias.into(),
            certificate,
            private_key,
            password,
        });
    }

    pub fn from_config(config: &CredentialsConfig) -> WssResult<Self> {
        let mut store = Self::new();
        for entry in &config.entries {
            let (certificate, private_key) = load_entry(entry)?;
            store.add(entry.alias.clone(), certificate, private_key, entry.password.clone());
        }
        Ok(store)
    }

    fn find(&self, certificate: &Certificate) -> Option<&CredentialEntry> {
        self.entries
            .iter()
            .find(|e| e.certificate.encoded == certificate.encoded)
    }
}

impl CredentialResolver for MemoryCredentialStore {
    fn get_private_key(
        &self,
        certificate: &Certificate,
        callback: &dyn PasswordCallback,
    ) -> WssResult<RsaPrivateKey> {
        let entry = self.find(certificate).ok_or_else(|| {
            WssError::new(
                ErrorCode::SecurityTokenUnavailable,
                format!("No private key for certificate {}", certificate.subject),
            )
        })?;

        if let Some(expected) = &entry.password {
            let supplied = callback
                .resolve(&entry.alias, CallbackUsage::PrivateKey)
                .and_then(|c| c.password)
                .unwrap_or_default();
            if !bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
                return Err(WssError::new(
                    ErrorCode::FailedAuthentication,
                    format!("Wrong password for key {}", entry.alias),
                ));
            }
        }

        entry.private_key.clone().ok_or_else(|| {
            WssError::new(
                ErrorCode::SecurityTokenUnavailable,
                format!("No private key for certificate {}", certificate.subject),
            )
        })
    }

    fn get_x509_certificates(&self, criteria: &CryptoType) -> WssResult<Vec<Certificate>> {
        let found: Vec<Certificate> = self
            .entries
            .iter()
            .filter(|e| match criteria {
                CryptoType::Alias(alias) => &e.alias == alias,
                CryptoType::IssuerSerial { issuer, serial } => {
                    same_distinguished_name(&e.certificate.issuer, issuer) && &e.certificate.serial == serial
                }
                CryptoType::SubjectKeyIdentifier(ski) => {
                    e.certificate.subject_key_identifier.as_deref() == Some(ski.as_slice())
                }
                CryptoType::Thumbprint(thumbprint) => &e.certificate.thumbprint() == thumbprint,
            })
            .map(|e| e.certificate.clone())
            .collect();
        debug!(criteria = ?criteria, found = found.len(), "Certificate lookup");
        Ok(found)
    }

    fn load_certificate(&self, encoded: &[u8]) -> WssResult<Certificate> {
        self.entries
            .iter()
            .find(|e| e.certificate.encoded == encoded)
            .map(|e| e.certificate.clone())
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::FailedAuthentication,
                    "Certificate is not trusted",
                )
            })
    }
}

/// Distinguished names compared without whitespace after separators.
fn same_distinguished_name(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.split(',')
            .map(|part| part.trim().to_ascii_lowercase())
            .collect::<Vec<_>>()
    };
    normalize(a) == normalize(b)
}

fn load_entry(entry: &CredentialEntryConfig) -> WssResult<(Certificate, Option<RsaPrivateKey>)> {
    let public_key = RsaPublicKey::from_public_key_pem(&entry.public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&entry.public_key_pem))
        .map_err(|e| WssError::config(format!("Invalid public key for {}: {}", entry.alias, e)))?;

    let private_key = match &entry.private_key_pem {
        Some(pem) => Some(
            RsaPrivateKey::from_pkcs8_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                .map_err(|e| WssError::config(format!("Invalid private key for {}: {}", entry.alias, e)))?,
        ),
        None => None,
    };

    let encoded = match &entry.certificate {
        Some(b64) => BASE64.decode(b64.trim())?,
        None => format!("{}|{}|{}", entry.subject, entry.issuer, entry.serial).into_bytes(),
    };
    let subject_key_identifier = entry
        .subject_key_identifier
        .as_deref()
        .map(|s| BASE64.decode(s.trim()))
        .transpose()?;

    let certificate = Certificate {
        encoded,
        subject: entry.subject.clone(),
        issuer: entry.issuer.clone(),
        serial: entry.serial.clone(),
        subject_key_identifier,
        public_key,
    };
    Ok((certificate, private_key))
}

/// Passwords and secrets keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemoryPasswordCallback {
    credentials: HashMap<String, PasswordCredential>,
}

impl MemoryPasswordCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, identifier: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.entry(identifier.into()).or_default().password = Some(password.into());
        self
    }

    pub fn with_secret(
        mut self,
        identifier: impl Into<String>,
        key: Vec<u8>,
        issuer: Option<String>,
    ) -> Self {
        let entry = self.credentials.entry(identifier.into()).or_default();
        entry.key = Some(key);
        entry.issuer = issuer;
        self
    }

    pub fn from_config(config: &CredentialsConfig) -> WssResult<Self> {
        let mut callback = Self::new();
        for SecretConfig {
            identifier,
            password,
            key,
            issuer,
        } in &config.secrets
        {
            let key = key.as_deref().map(|k| BASE64.decode(k.trim())).transpose()?;
            callback.credentials.insert(
                identifier.clone(),
                PasswordCredential {
                    password: password.clone(),
                    key,
                    issuer: issuer.clone(),
                },
            );
        }
        Ok(callback)
    }
}

impl PasswordCallback for MemoryPasswordCallback {
    fn resolve(&self, identifier: &str, usage: CallbackUsage) -> Option<PasswordCredential> {
        let found = self.credentials.get(identifier).cloned();
        debug!(identifier = identifier, usage = ?usage, found = found.is_some(), "Password callback");
        found
    }
}


#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;

    #[test]
    fn test_lookup_by_every_criteria() {
        let store = store();
        let alice = certificate("alice", 0);
        for criteria in [
            CryptoType::Alias("alice".into()),
            CryptoType::IssuerSerial {
                issuer: "cn=test ca".into(),
                serial: "1000".into(),
            },
            CryptoType::SubjectKeyIdentifier(b"alice".to_vec()),
            CryptoType::Thumbprint(alice.thumbprint()),
        ] {
            let found = store.get_x509_certificates(&criteria).unwrap();
            assert_eq!(found, vec![alice.clone()], "{:?}", criteria);
        }
    }

    #[test]
    fn test_private_key_password_checked() {
        let store = store();
        let bob = certificate("bob", 1);
        let err = store
            .get_private_key(&bob, &MemoryPasswordCallback::new())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedAuthentication);

        let callback = MemoryPasswordCallback::new().with_password("bob", "bobpw");
        assert!(store.get_private_key(&bob, &callback).is_ok());
    }

    #[test]
    fn test_unknown_certificate_is_untrusted() {
        let err = store().load_certificate(b"CN=mallory").unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedAuthentication);
    }

    #[test]
    fn test_key_bits() {
        assert_eq!(certificate("alice", 0).key_bits(), 1024);
    }
}
