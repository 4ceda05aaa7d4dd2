//! Security tokens and their key material.
//!
//! A token is identified by its id, carries one [`KeyMaterial`] and may wrap
//! another token through a non-owning back-reference. Key resolution walks
//! the wrapping chain with a bounded depth.

pub mod derived;
pub mod provider;
pub mod reference;

pub use derived::DerivedKeyParams;
pub use provider::{LazyTokenProvider, SecurityTokenProvider, StaticTokenProvider};
pub use reference::{ResolvedToken, SecurityTokenReference};

use crate::credentials::Certificate;
use crate::crypto;
use crate::error::{ErrorCode, WssError, WssResult};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use std::cell::OnceCell;
use std::rc::{Rc, Weak};

/// Maximum number of wrapping hops followed while resolving a key.
const MAX_WRAPPING_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    X509V3,
    UsernameToken,
    SecurityContextToken,
    DerivedKey,
    EncryptedKey,
    HttpsToken,
    SharedSecret,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X509V3 => "X509Token",
            Self::UsernameToken => "UsernameToken",
            Self::SecurityContextToken => "SecurityContextToken",
            Self::DerivedKey => "DerivedKeyToken",
            Self::EncryptedKey => "EncryptedKeyToken",
            Self::HttpsToken => "HttpsToken",
            Self::SharedSecret => "SharedSecret",
        }
    }
}

/// How a token was referenced from the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyIdentifierType {
    DirectReference,
    ExternalReference,
    IssuerSerial,
    SkiKeyIdentifier,
    ThumbprintIdentifier,
    EncryptedKeySha1,
    EmbeddedCertificate,
    EmbeddedToken,
}

/// Key material carried by a token.
pub enum KeyMaterial {
    None,
    Symmetric(Vec<u8>),
    Asymmetric {
        public: RsaPublicKey,
        private: Option<RsaPrivateKey>,
    },
    /// Derived from the wrapped token's secret
    Derived(DerivedKeyParams),
    /// Forwards to the wrapped token
    Delegated,
    /// Random stand-in for a key that failed to unwrap
    Masked(MaskedKey),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::None => "None",
            Self::Symmetric(_) => "Symmetric",
            Self::Asymmetric { .. } => "Asymmetric",
            Self::Derived(_) => "Derived",
            Self::Delegated => "Delegated",
            Self::Masked(_) => "Masked",
        };
        f.write_str(kind)
    }
}

/// Random key generated on first use, sized for the algorithm of the
/// ciphertext it is first used on.
///
/// Referenced ciphertexts are met in document order and the message fails
/// at the first one, so that ciphertext is the only one the key is ever
/// tried against.
pub struct MaskedKey {
    key: OnceCell<Vec<u8>>,
}

impl MaskedKey {
    pub fn new() -> Self {
        Self { key: OnceCell::new() }
    }

    fn key_for(&self, algorithm: &str) -> Vec<u8> {
        self.key
            .get_or_init(|| crypto::random_bytes(crypto::symmetric_key_length(algorithm).unwrap_or(16)))
            .clone()
    }
}

impl Default for MaskedKey {
    fn default() -> Self {
        Self::new()
    }
}

/// A security token.
#[derive(Debug)]
pub struct SecurityToken {
    id: String,
    token_type: TokenType,
    key: KeyMaterial,
    certificates: Vec<Certificate>,
    wrapped: Option<Weak<SecurityToken>>,
    key_identifier: Option<KeyIdentifierType>,
    issuer_name: Option<String>,
    external_uri_ref: bool,
    username: Option<String>,
    password_type: Option<String>,
    encrypted_key_sha1: Option<String>,
}

impl SecurityToken {
    pub fn new(id: impl Into<String>, token_type: TokenType, key: KeyMaterial) -> Self {
        Self {
            id: id.into(),
            token_type,
            key,
            certificates: Vec::new(),
            wrapped: None,
            key_identifier: None,
            issuer_name: None,
            external_uri_ref: false,
            username: None,
            password_type: None,
            encrypted_key_sha1: None,
        }
    }

    /// X.509 token for a certificate and, when held, its private key.
    pub fn x509(id: impl Into<String>, certificate: Certificate, private: Option<RsaPrivateKey>) -> Self {
        let key = KeyMaterial::Asymmetric {
            public: certificate.public_key.clone(),
            private,
        };
        let mut token = Self::new(id, TokenType::X509V3, key);
        token.certificates.push(certificate);
        token
    }

    /// Attach a back-reference to `wrapped`. A token can not wrap itself.
    pub fn wrapping(mut self, wrapped: &Rc<SecurityToken>) -> WssResult<Self> {
        if wrapped.id == self.id {
            return Err(WssError::new(
                ErrorCode::InvalidSecurityToken,
                format!("Token {} can not wrap itself", self.id),
            ));
        }
        self.wrapped = Some(Rc::downgrade(wrapped));
        Ok(self)
    }

    pub fn with_certificates(mut self, certificates: Vec<Certificate>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn with_key_identifier(mut self, key_identifier: KeyIdentifierType) -> Self {
        self.key_identifier = Some(key_identifier);
        self
    }

    pub fn with_issuer_name(mut self, issuer: impl Into<String>) -> Self {
        self.issuer_name = Some(issuer.into());
        self
    }

    pub fn with_external_uri_ref(mut self, external: bool) -> Self {
        self.external_uri_ref = external;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password_type(mut self, password_type: impl Into<String>) -> Self {
        self.password_type = Some(password_type.into());
        self
    }

    pub fn with_encrypted_key_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.encrypted_key_sha1 = Some(sha1.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn key_identifier(&self) -> Option<KeyIdentifierType> {
        self.key_identifier
    }

    pub fn issuer_name(&self) -> Option<&str> {
        self.issuer_name.as_deref()
    }

    pub fn is_external_uri_ref(&self) -> bool {
        self.external_uri_ref
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password_type(&self) -> Option<&str> {
        self.password_type.as_deref()
    }

    pub fn encrypted_key_sha1(&self) -> Option<&str> {
        self.encrypted_key_sha1.as_deref()
    }

    /// The wrapped token, if it is still alive.
    pub fn wrapped_token(&self) -> WssResult<Rc<SecurityToken>> {
        self.wrapped
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::SecurityTokenUnavailable,
                    format!("Token {} does not wrap an available token", self.id),
                )
            })
    }

    pub fn is_asymmetric(&self) -> bool {
        matches!(self.key, KeyMaterial::Asymmetric { .. }) || !self.certificates.is_empty()
    }

    fn resolve_secret(&self, algorithm: &str, depth: usize) -> WssResult<Vec<u8>> {
        if depth > MAX_WRAPPING_DEPTH {
            return Err(WssError::new(
                ErrorCode::InvalidSecurityToken,
                format!("Token wrapping of {} is too deep", self.id),
            ));
        }
        match &self.key {
            KeyMaterial::Symmetric(key) => Ok(key.clone()),
            KeyMaterial::Masked(masked) => Ok(masked.key_for(algorithm)),
            KeyMaterial::Derived(params) => {
                let base = self.wrapped_token()?;
                let secret = base.resolve_secret(algorithm, depth + 1)?;
                params.derive(&secret)
            }
            KeyMaterial::Delegated => self
                .wrapped_token()?
                .resolve_secret(algorithm, depth + 1),
            KeyMaterial::None | KeyMaterial::Asymmetric { .. } => Err(WssError::new(
                ErrorCode::InvalidSecurityToken,
                format!("Token {} has no secret key", self.id),
            )),
        }
    }

    fn resolve_public(&self, depth: usize) -> Option<RsaPublicKey> {
        if depth > MAX_WRAPPING_DEPTH {
            return None;
        }
        match &self.key {
            KeyMaterial::Asymmetric { public, .. } => Some(public.clone()),
            KeyMaterial::Delegated => self
                .wrapped_token()
                .ok()
                .and_then(|t| t.resolve_public(depth + 1)),
            _ => self.certificates.first().map(|c| c.public_key.clone()),
        }
    }

    fn resolve_private(&self, depth: usize) -> Option<RsaPrivateKey> {
        if depth > MAX_WRAPPING_DEPTH {
            return None;
        }
        match &self.key {
            KeyMaterial::Asymmetric { private, .. } => private.clone(),
            KeyMaterial::Delegated => self
                .wrapped_token()
                .ok()
                .and_then(|t| t.resolve_private(depth + 1)),
            _ => None,
        }
    }
}

/// Tokens that yield a secret key for a given algorithm.
pub trait HasSymmetricKey {
    /// Secret for `algorithm`.
    fn secret_key(&self, algorithm: &str) -> WssResult<Vec<u8>>;
}

/// Tokens backed by an RSA key pair.
pub trait HasKeyPair {
    fn public_key(&self) -> Option<RsaPublicKey>;
    fn private_key(&self) -> Option<RsaPrivateKey>;
}

/// Tokens carrying an X.509 certificate chain.
pub trait HasCertificateChain {
    fn certificates(&self) -> &[Certificate];
}

impl HasSymmetricKey for SecurityToken {
    fn secret_key(&self, algorithm: &str) -> WssResult<Vec<u8>> {
        self.resolve_secret(algorithm, 0)
    }
}

impl HasKeyPair for SecurityToken {
    fn public_key(&self) -> Option<RsaPublicKey> {
        self.resolve_public(0)
    }

    fn private_key(&self) -> Option<RsaPrivateKey> {
        self.resolve_private(0)
    }
}

impl HasCertificateChain for SecurityToken {
    fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }
}
