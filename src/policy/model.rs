//! Normalized policy: alternatives of typed assertions.

use crate::constants::{
    is_body, is_header, TAG_WSC0502_SECURITY_CONTEXT_TOKEN, TAG_WSSE_BINARY_SECURITY_TOKEN, TAG_WSSE_USERNAME_TOKEN,
};
use crate::event::{HttpsAuthentication, TokenUsage};
use crate::token::{KeyIdentifierType, TokenType};
use crate::xml::QName;
use std::fmt;

/// A policy in normal form: the message must satisfy one alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    alternatives: Vec<Alternative>,
}

impl Policy {
    pub fn new(alternatives: Vec<Alternative>) -> Self {
        Self { alternatives }
    }

    /// The policy every message satisfies.
    pub fn empty() -> Self {
        Self::new(vec![Alternative::default()])
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }
}

/// Assertions that must all hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alternative {
    pub assertions: Vec<Assertion>,
}

impl Alternative {
    pub fn new(assertions: Vec<Assertion>) -> Self {
        Self { assertions }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assertion {
    Token { role: TokenRole, token: TokenAssertion },
    /// Named suite, e.g. `Basic256`
    AlgorithmSuite(String),
    SignedParts(PartsAssertion),
    EncryptedParts(PartsAssertion),
    /// Header elements that must be present
    RequiredParts(Vec<QName>),
    IncludeTimestamp,
    ProtectionOrder(ProtectionOrder),
    RequireSignatureConfirmation,
    /// An assertion this enforcer can not evaluate; never satisfied
    Unsupported(QName),
}

/// Where a token assertion appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRole {
    Signature,
    Encryption,
    Protection,
    Initiator,
    Recipient,
    Transport,
    Supporting,
    SignedSupporting,
}

impl TokenRole {
    /// Policy element name of the role.
    pub fn from_local(local: &str) -> Option<Self> {
        Some(match local {
            "SignatureToken" => Self::Signature,
            "EncryptionToken" => Self::Encryption,
            "ProtectionToken" => Self::Protection,
            "InitiatorToken" => Self::Initiator,
            "RecipientToken" => Self::Recipient,
            "TransportToken" => Self::Transport,
            "SupportingTokens" => Self::Supporting,
            "SignedSupportingTokens" => Self::SignedSupporting,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "SignatureToken",
            Self::Encryption => "EncryptionToken",
            Self::Protection => "ProtectionToken",
            Self::Initiator => "InitiatorToken",
            Self::Recipient => "RecipientToken",
            Self::Transport => "TransportToken",
            Self::Supporting => "SupportingTokens",
            Self::SignedSupporting => "SignedSupportingTokens",
        }
    }

    /// Token usages reported for tokens playing this role. Transport tokens
    /// are reported through `HttpsToken` events instead.
    pub fn usages(&self) -> &'static [TokenUsage] {
        match self {
            Self::Signature | Self::Initiator => &[TokenUsage::MainSignature],
            Self::Encryption | Self::Recipient => &[TokenUsage::MainEncryption],
            Self::Protection => &[TokenUsage::MainSignature, TokenUsage::MainEncryption],
            Self::Transport => &[],
            Self::Supporting | Self::SignedSupporting => &[
                TokenUsage::SupportingTokens,
                TokenUsage::SignedSupportingTokens,
            ],
        }
    }
}

impl fmt::Display for TokenRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username token password requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordRequirement {
    #[default]
    Any,
    Hashed,
    None,
}

/// The token a role requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAssertion {
    SecurityContext {
        issuer_name: Option<String>,
        require_external_uri_reference: bool,
        require_derived_keys: bool,
    },
    X509 {
        reference: Option<KeyIdentifierType>,
        require_derived_keys: bool,
    },
    Username {
        password: PasswordRequirement,
    },
    Https {
        authentication: Option<HttpsAuthentication>,
        issuer_name: Option<String>,
    },
}

impl TokenAssertion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SecurityContext { .. } => "SecurityContextToken",
            Self::X509 { .. } => "X509Token",
            Self::Username { .. } => "UsernameToken",
            Self::Https { .. } => "HttpsToken",
        }
    }

    /// Whether a token of `kind` can satisfy this assertion. A symmetric
    /// binding over an X.509 token signs and encrypts with the encrypted key.
    pub fn accepts(&self, kind: TokenType) -> bool {
        match self {
            Self::SecurityContext { .. } => kind == TokenType::SecurityContextToken,
            Self::X509 { .. } => matches!(kind, TokenType::X509V3 | TokenType::EncryptedKey),
            Self::Username { .. } => kind == TokenType::UsernameToken,
            Self::Https { .. } => kind == TokenType::HttpsToken,
        }
    }

    /// Security header element carrying the token.
    pub fn element(&self) -> Option<QName> {
        match self {
            Self::SecurityContext { .. } => Some(TAG_WSC0502_SECURITY_CONTEXT_TOKEN),
            Self::X509 { .. } => Some(TAG_WSSE_BINARY_SECURITY_TOKEN),
            Self::Username { .. } => Some(TAG_WSSE_USERNAME_TOKEN),
            Self::Https { .. } => None,
        }
    }
}

/// `SignedParts` / `EncryptedParts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsAssertion {
    pub body: bool,
    pub headers: Vec<HeaderPart>,
    /// Every header element is covered
    pub all_headers: bool,
}

impl PartsAssertion {
    /// Whether the part at `path` falls under this assertion.
    pub fn covers(&self, path: &[QName]) -> bool {
        match path {
            [_, body] if is_body(body) => self.body,
            [_, header, element] if is_header(header) => {
                self.all_headers || self.headers.iter().any(|h| h.matches(element))
            }
            _ => false,
        }
    }
}

/// A header by namespace, optionally narrowed to one local name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPart {
    pub namespace: String,
    pub name: Option<String>,
}

impl HeaderPart {
    pub fn matches(&self, element: &QName) -> bool {
        element.namespace() == self.namespace && self.name.as_deref().map_or(true, |n| n == element.local())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionOrder {
    #[default]
    SignBeforeEncrypting,
    EncryptBeforeSigning,
}

impl fmt::Display for ProtectionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignBeforeEncrypting => f.write_str("SignBeforeEncrypting"),
            Self::EncryptBeforeSigning => f.write_str("EncryptBeforeSigning"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{soap11_body_path, TAG_SOAP11_ENVELOPE, TAG_SOAP11_HEADER};

    #[test]
    fn test_parts_cover_body_and_named_headers() {
        let parts = PartsAssertion {
            body: true,
            headers: vec![HeaderPart {
                namespace: "http://example.org".into(),
                name: Some("a".into()),
            }],
            all_headers: false,
        };
        assert!(parts.covers(&soap11_body_path()));
        let header = |local: &str| {
            vec![
                TAG_SOAP11_ENVELOPE,
                TAG_SOAP11_HEADER,
                QName::new("http://example.org", local),
            ]
        };
        assert!(parts.covers(&header("a")));
        assert!(!parts.covers(&header("b")));
    }

    #[test]
    fn test_roles_by_element_name() {
        assert_eq!(TokenRole::from_local("ProtectionToken"), Some(TokenRole::Protection));
        assert_eq!(TokenRole::Protection.usages().len(), 2);
        assert!(TokenRole::from_local("AlgorithmSuite").is_none());
    }
}
