//! Configuration types for WS-Security processing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Inbound (verify / decrypt) processing
    pub inbound: InboundConfig,

    /// Outbound (sign / encrypt) processing
    pub outbound: OutboundConfig,

    /// Named algorithm suite, e.g. `Basic256Sha256`
    pub algorithm_suite: Option<String>,

    /// Basic Security Profile compliance
    pub bsp: BspConfig,

    /// Keystore and secrets
    pub credentials: CredentialsConfig,

    /// WS-SecurityPolicy document enforced by the agent
    pub policy: Option<PathBuf>,

    /// Policies for single operations, keyed by `{namespace}local`
    pub operation_policies: BTreeMap<String, PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            algorithm_suite: None,
            bsp: BspConfig::default(),
            credentials: CredentialsConfig::default(),
            policy: None,
            operation_policies: BTreeMap::new(),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Maximum body size to process (bytes)
    pub max_body_size: usize,

    /// Action on failure: "block" or "allow"
    pub fail_action: FailAction,

    /// Allowed Content-Type headers for SOAP requests
    pub allowed_content_types: Vec<String>,

    /// Header that carries the authenticated username upstream
    pub identity_header: Option<String>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1_048_576, // 1MB
            fail_action: FailAction::Block,
            allowed_content_types: vec![
                "text/xml".to_string(),
                "application/soap+xml".to_string(),
                "application/xml".to_string(),
            ],
            identity_header: None,
        }
    }
}

/// Failure action when a message is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    /// Block the request
    #[default]
    Block,
    /// Allow the request (log only)
    Allow,
}

/// Inbound processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Reject messages without a Security header
    pub require_security_header: bool,

    /// Accept RSA-1.5 key transport outside an RSA-1.5 suite
    pub allow_rsa15_key_transport: bool,

    /// Every EncryptedData must also be covered by a signature
    pub require_signed_encrypted_data_elements: bool,

    /// Compare SignatureConfirmation values with the signatures we sent
    pub enable_signature_confirmation_verification: bool,

    pub timestamp: TimestampConfig,

    pub username_token: UsernameTokenConfig,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            require_security_header: true,
            allow_rsa15_key_transport: false,
            require_signed_encrypted_data_elements: false,
            enable_signature_confirmation_verification: false,
            timestamp: TimestampConfig::default(),
            username_token: UsernameTokenConfig::default(),
        }
    }
}

/// Timestamp freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Reject timestamps created more than `ttl_secs` ago
    pub strict: bool,

    /// Maximum age of Created (seconds)
    pub ttl_secs: u64,

    /// Tolerated clock skew for Created in the future (seconds)
    pub future_ttl_secs: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            strict: true,
            ttl_secs: 300,
            future_ttl_secs: 60,
        }
    }
}

/// UsernameToken handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsernameTokenConfig {
    /// Accept plain-text passwords
    pub allow_password_text: bool,

    /// Maximum age of the token's Created (seconds)
    pub max_age_secs: u64,
}

impl Default for UsernameTokenConfig {
    fn default() -> Self {
        Self {
            allow_password_text: true,
            max_age_secs: 300,
        }
    }
}

/// Outbound actions, applied in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundAction {
    Timestamp,
    UsernameToken,
    Signature,
    Encrypt,
    SecurityContextToken,
    SignatureWithDerivedKey,
    EncryptWithDerivedKey,
    SignatureConfirmation,
}

/// How a token is referenced from a signature or an encrypted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyIdentifierConfig {
    #[default]
    IssuerSerial,
    DirectReference,
    SkiKeyIdentifier,
    ThumbprintIdentifier,
}

/// UsernameToken password encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordType {
    #[default]
    Digest,
    Text,
}

/// Outbound processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub actions: Vec<OutboundAction>,

    /// Keystore alias used to sign
    pub signature_user: Option<String>,

    /// Keystore alias of the encryption recipient
    pub encryption_user: Option<String>,

    /// UsernameToken user
    pub username: Option<String>,

    pub signature_algorithm: String,
    pub digest_algorithm: String,
    pub signature_key_identifier: KeyIdentifierConfig,
    pub encryption_key_identifier: KeyIdentifierConfig,
    pub encryption_symmetric_algorithm: String,
    pub key_transport_algorithm: String,

    /// Additional signed elements, as `{namespace}local`
    pub signature_parts: Vec<String>,

    /// Additional encrypted elements, as `{namespace}local`
    pub encryption_parts: Vec<String>,

    pub timestamp_ttl_secs: u64,
    pub password_type: PasswordType,
    pub security_context_token: SecurityContextTokenConfig,

    /// Derived key length in bytes
    pub derived_key_length: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            signature_user: None,
            encryption_user: None,
            username: None,
            signature_algorithm: crate::constants::ALG_RSA_SHA1.to_string(),
            digest_algorithm: crate::constants::ALG_SHA1.to_string(),
            signature_key_identifier: KeyIdentifierConfig::IssuerSerial,
            encryption_key_identifier: KeyIdentifierConfig::IssuerSerial,
            encryption_symmetric_algorithm: crate::constants::ALG_AES128.to_string(),
            key_transport_algorithm: crate::constants::ALG_KEYTRANSPORT_RSAOAEP.to_string(),
            signature_parts: Vec::new(),
            encryption_parts: Vec::new(),
            timestamp_ttl_secs: 300,
            password_type: PasswordType::Digest,
            security_context_token: SecurityContextTokenConfig::default(),
            derived_key_length: 32,
        }
    }
}

/// Outbound SecurityContextToken.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityContextTokenConfig {
    /// Context identifier; its secret comes from the credential secrets
    pub identifier: Option<String>,

    /// Reference the token by its identifier instead of embedding it
    pub external_reference: bool,
}

/// Basic Security Profile enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BspConfig {
    pub enabled: bool,

    /// Rule patterns to suppress (e.g., "R56*")
    pub ignored_rules: Vec<String>,
}

impl Default for BspConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignored_rules: Vec::new(),
        }
    }
}

/// In-memory keystore and secrets.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub entries: Vec<CredentialEntryConfig>,
    pub secrets: Vec<SecretConfig>,
}

/// One keystore entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntryConfig {
    pub alias: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,

    /// Base64 certificate bytes as they appear in messages
    #[serde(default)]
    pub certificate: Option<String>,

    /// Base64 subject key identifier
    #[serde(default)]
    pub subject_key_identifier: Option<String>,

    pub public_key_pem: String,

    #[serde(default)]
    pub private_key_pem: Option<String>,

    /// Password protecting the private key
    #[serde(default)]
    pub password: Option<String>,
}

/// A password or shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    pub identifier: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Base64 key
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub issuer: Option<String>,
}
