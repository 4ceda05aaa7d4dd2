//! Security events: the protocol-level facts observed while a message is
//! processed, delivered in emission order to listeners such as the policy
//! enforcer.

use crate::error::WssResult;
use crate::token::{KeyIdentifierType, SecurityToken, TokenType};
use crate::xml::{path_to_string, QName};
use serde::Serialize;

/// Role a token played in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUsage {
    MainSignature,
    MainEncryption,
    Signature,
    Encryption,
    SupportingTokens,
    SignedSupportingTokens,
    EndorsingSupportingTokens,
    SignedEndorsingSupportingTokens,
    EncryptedSupportingTokens,
}

/// One step of message protection, in the order it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionAction {
    Signature,
    Encryption,
}

/// A token was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenEvent {
    pub kind: TokenType,
    pub token_id: String,
    pub usages: Vec<TokenUsage>,
    pub issuer_name: Option<String>,
    pub external_uri_ref: bool,
    pub derived: bool,
    pub key_identifier: Option<KeyIdentifierType>,
    pub password_type: Option<String>,
    pub key_length: Option<usize>,
}

impl TokenEvent {
    pub fn new(kind: TokenType, token_id: impl Into<String>) -> Self {
        Self {
            kind,
            token_id: token_id.into(),
            usages: Vec::new(),
            issuer_name: None,
            external_uri_ref: false,
            derived: false,
            key_identifier: None,
            password_type: None,
            key_length: None,
        }
    }

    /// Describe `token` used for `usage`. Derived tokens report the token
    /// their key came from, flagged as derived.
    pub fn for_token(token: &SecurityToken, usage: TokenUsage) -> Self {
        let derived = token.token_type() == TokenType::DerivedKey;
        let base = if derived { token.wrapped_token().ok() } else { None };
        let source = base.as_deref().unwrap_or(token);

        let mut event = Self::new(source.token_type(), source.id());
        event.usages.push(usage);
        event.issuer_name = token
            .issuer_name()
            .or_else(|| source.issuer_name())
            .map(str::to_string);
        event.external_uri_ref = token.is_external_uri_ref() || source.is_external_uri_ref();
        event.derived = derived;
        event.key_identifier = token.key_identifier();
        event.password_type = source.password_type().map(str::to_string);
        event
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        if !self.usages.contains(&usage) {
            self.usages.push(usage);
        }
        self
    }
}

/// A message part and whether it was protected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartEvent {
    pub path: Vec<QName>,
    /// Signed or encrypted, depending on the event
    pub protected: bool,
    /// Encrypted content rather than the element itself
    pub content: bool,
    pub token_id: Option<String>,
    pub protection_order: Vec<ProtectionAction>,
}

impl PartEvent {
    pub fn new(path: Vec<QName>, protected: bool) -> Self {
        Self {
            path,
            protected,
            content: false,
            token_id: None,
            protection_order: Vec::new(),
        }
    }

    pub fn path_string(&self) -> String {
        path_to_string(&self.path)
    }
}

/// Transport-level token observed outside the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpsTokenEvent {
    /// `client_certificate`, `basic`, `digest` or `none`
    pub authentication: HttpsAuthentication,
    pub issuer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpsAuthentication {
    None,
    ClientCertificate,
    Basic,
    Digest,
}

/// Algorithm observed while processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmSuiteEvent {
    pub algorithm: String,
    pub usage: AlgorithmUsage,
    pub key_length: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmUsage {
    Signature,
    Digest,
    Canonicalization,
    SymmetricEncryption,
    KeyWrap,
    KeyDerivation,
}

/// A security-relevant fact observed while processing a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    Token(TokenEvent),
    SignedPart(PartEvent),
    SignedElement(PartEvent),
    EncryptedPart(PartEvent),
    Operation { name: QName },
    RequiredPart { path: Vec<QName> },
    HttpsToken(HttpsTokenEvent),
    SignatureConfirmation { value: Option<String> },
    Timestamp { created: String, expires: Option<String> },
    AlgorithmSuite(AlgorithmSuiteEvent),
}

impl SecurityEvent {
    pub fn operation(name: QName) -> Self {
        Self::Operation { name }
    }

    pub fn required_part(path: Vec<QName>) -> Self {
        Self::RequiredPart { path }
    }

    /// Short event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "Token",
            Self::SignedPart(_) => "SignedPart",
            Self::SignedElement(_) => "SignedElement",
            Self::EncryptedPart(_) => "EncryptedPart",
            Self::Operation { .. } => "Operation",
            Self::RequiredPart { .. } => "RequiredPart",
            Self::HttpsToken(_) => "HttpsToken",
            Self::SignatureConfirmation { .. } => "SignatureConfirmation",
            Self::Timestamp { .. } => "Timestamp",
            Self::AlgorithmSuite(_) => "AlgorithmSuite",
        }
    }
}

/// Receives security events in emission order.
pub trait SecurityEventListener {
    fn register_security_event(&mut self, event: &SecurityEvent) -> WssResult<()>;

    /// Called once the whole message has been processed.
    fn finish(&mut self) -> WssResult<()> {
        Ok(())
    }
}

impl SecurityEventListener for Vec<SecurityEvent> {
    fn register_security_event(&mut self, event: &SecurityEvent) -> WssResult<()> {
        self.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{KeyMaterial, SecurityToken};
    use std::rc::Rc;

    #[test]
    fn test_derived_token_event_reports_base() {
        let base = Rc::new(
            SecurityToken::new("sct-1", TokenType::SecurityContextToken, KeyMaterial::Symmetric(vec![1; 32]))
                .with_issuer_name("xs:anyURI")
                .with_external_uri_ref(true),
        );
        let derived = SecurityToken::new("dk-1", TokenType::DerivedKey, KeyMaterial::Delegated)
            .wrapping(&base)
            .unwrap();

        let event = TokenEvent::for_token(&derived, TokenUsage::MainSignature);
        assert_eq!(event.kind, TokenType::SecurityContextToken);
        assert_eq!(event.token_id, "sct-1");
        assert!(event.derived);
        assert!(event.external_uri_ref);
        assert_eq!(event.issuer_name.as_deref(), Some("xs:anyURI"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SecurityEvent::operation(QName::new("urn:svc", "Echo"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "operation");
        assert_eq!(json["name"], "{urn:svc}Echo");
    }
}
