//! `wsse:SecurityTokenReference` parsing, rendering and resolution.

use super::{KeyIdentifierType, KeyMaterial, SecurityToken, StaticTokenProvider, TokenType};
use crate::constants::{
    ATT_NULL_ENCODING_TYPE, ATT_NULL_URI, ATT_NULL_VALUE_TYPE, NS_BASE64_ENCODING, NS_ENCRYPTED_KEY_SHA1,
    NS_THUMBPRINT, NS_X509_SKI, TAG_DSIG_X509_CERTIFICATE, TAG_DSIG_X509_DATA, TAG_DSIG_X509_ISSUER_NAME,
    TAG_DSIG_X509_ISSUER_SERIAL, TAG_DSIG_X509_SERIAL_NUMBER, TAG_WSSE_BINARY_SECURITY_TOKEN,
    TAG_WSSE_EMBEDDED, TAG_WSSE_KEY_IDENTIFIER, TAG_WSSE_REFERENCE, TAG_WSSE_SECURITY_TOKEN_REFERENCE,
};
use crate::context::SecurityContext;
use crate::credentials::{CallbackUsage, Certificate, CryptoType};
use crate::crypto::{base64_decode, base64_encode};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::token::HasCertificateChain;
use crate::xml::{StartElement, XmlElement};
use std::rc::Rc;
use tracing::debug;

/// Parsed security token reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityTokenReference {
    /// `wsse:Reference`: `#id` within the message, anything else external
    Direct { uri: String, value_type: Option<String> },
    /// `wsse:KeyIdentifier` with its decoded value
    KeyIdentifier { value_type: String, value: Vec<u8> },
    /// `ds:X509Data/ds:X509IssuerSerial`
    IssuerSerial { issuer: String, serial: String },
    /// `ds:X509Data/ds:X509Certificate`
    Certificate(Vec<u8>),
    /// `wsse:Embedded` holding the token itself
    Embedded(XmlElement),
}

/// A token found through a reference, with the way it was referenced.
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: Rc<SecurityToken>,
    pub key_identifier: KeyIdentifierType,
}

fn unavailable(what: impl std::fmt::Display) -> WssError {
    WssError::new(
        ErrorCode::SecurityTokenUnavailable,
        format!("Referenced security token could not be retrieved: {}", what),
    )
}

impl SecurityTokenReference {
    pub fn direct(uri: impl Into<String>, value_type: Option<&str>) -> Self {
        Self::Direct {
            uri: uri.into(),
            value_type: value_type.map(str::to_string),
        }
    }

    pub fn issuer_serial(certificate: &Certificate) -> Self {
        Self::IssuerSerial {
            issuer: certificate.issuer.clone(),
            serial: certificate.serial.clone(),
        }
    }

    pub fn subject_key_identifier(certificate: &Certificate) -> WssResult<Self> {
        let value = certificate.subject_key_identifier.clone().ok_or_else(|| {
            WssError::new(
                ErrorCode::FailedSignature,
                format!("Certificate {} has no subject key identifier", certificate.subject),
            )
        })?;
        Ok(Self::KeyIdentifier {
            value_type: NS_X509_SKI.to_string(),
            value,
        })
    }

    pub fn thumbprint(certificate: &Certificate) -> Self {
        Self::KeyIdentifier {
            value_type: NS_THUMBPRINT.to_string(),
            value: certificate.thumbprint(),
        }
    }

    /// Parse a `wsse:SecurityTokenReference` element.
    pub fn parse(element: &XmlElement) -> WssResult<Self> {
        if element.name() != &TAG_WSSE_SECURITY_TOKEN_REFERENCE {
            return Err(WssError::new(
                ErrorCode::InvalidSecurityToken,
                format!("Expected SecurityTokenReference, found {}", element.name()),
            ));
        }
        let child = element.elements().next().ok_or_else(|| {
            WssError::new(ErrorCode::InvalidSecurityToken, "Empty SecurityTokenReference")
        })?;

        if child.name() == &TAG_WSSE_REFERENCE {
            let uri = child
                .attribute(&ATT_NULL_URI)
                .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "Reference without URI"))?;
            return Ok(Self::direct(uri, child.attribute(&ATT_NULL_VALUE_TYPE)));
        }
        if child.name() == &TAG_WSSE_KEY_IDENTIFIER {
            let value_type = child.attribute(&ATT_NULL_VALUE_TYPE).ok_or_else(|| {
                WssError::new(ErrorCode::InvalidSecurityToken, "KeyIdentifier without ValueType")
            })?;
            return Ok(Self::KeyIdentifier {
                value_type: value_type.to_string(),
                value: base64_decode(&child.text())?,
            });
        }
        if child.name() == &TAG_DSIG_X509_DATA {
            if let Some(issuer_serial) = child.child(&TAG_DSIG_X509_ISSUER_SERIAL) {
                let issuer = issuer_serial.child_text(&TAG_DSIG_X509_ISSUER_NAME);
                let serial = issuer_serial.child_text(&TAG_DSIG_X509_SERIAL_NUMBER);
                return match (issuer, serial) {
                    (Some(issuer), Some(serial)) => Ok(Self::IssuerSerial { issuer, serial }),
                    _ => Err(WssError::new(ErrorCode::InvalidSecurityToken, "Incomplete X509IssuerSerial")),
                };
            }
            if let Some(certificate) = child.child_text(&TAG_DSIG_X509_CERTIFICATE) {
                return Ok(Self::Certificate(base64_decode(&certificate)?));
            }
        }
        if child.name() == &TAG_WSSE_EMBEDDED {
            let token = child
                .elements()
                .next()
                .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "Empty Embedded reference"))?;
            return Ok(Self::Embedded(token.clone()));
        }
        Err(WssError::new(
            ErrorCode::UnsupportedSecurityToken,
            format!("Unsupported SecurityTokenReference child {}", child.name()),
        ))
    }

    /// Parse the reference held by a `ds:KeyInfo`. A security token reference
    /// is preferred over bare `ds:X509Data`.
    pub fn from_key_info(key_info: &XmlElement) -> WssResult<Self> {
        if let Some(reference) = key_info.child(&TAG_WSSE_SECURITY_TOKEN_REFERENCE) {
            return Self::parse(reference);
        }
        if let Some(data) = key_info.child(&TAG_DSIG_X509_DATA) {
            let wrapper = XmlElement::declaring(TAG_WSSE_SECURITY_TOKEN_REFERENCE).with_child(data.clone());
            return Self::parse(&wrapper);
        }
        Err(unavailable("KeyInfo carries no usable reference"))
    }

    /// Render as a `wsse:SecurityTokenReference` element.
    pub fn to_element(&self) -> XmlElement {
        let child = match self {
            Self::Direct { uri, value_type } => {
                let mut reference = XmlElement::new(StartElement::new(TAG_WSSE_REFERENCE))
                    .with_attribute(ATT_NULL_URI, uri.clone());
                if let Some(value_type) = value_type {
                    reference = reference.with_attribute(ATT_NULL_VALUE_TYPE, value_type.clone());
                }
                reference
            }
            Self::KeyIdentifier { value_type, value } => {
                XmlElement::new(StartElement::new(TAG_WSSE_KEY_IDENTIFIER))
                    .with_attribute(ATT_NULL_ENCODING_TYPE, NS_BASE64_ENCODING)
                    .with_attribute(ATT_NULL_VALUE_TYPE, value_type.clone())
                    .with_text(base64_encode(value))
            }
            Self::IssuerSerial { issuer, serial } => XmlElement::declaring(TAG_DSIG_X509_DATA).with_child(
                XmlElement::new(StartElement::new(TAG_DSIG_X509_ISSUER_SERIAL))
                    .with_child(
                        XmlElement::new(StartElement::new(TAG_DSIG_X509_ISSUER_NAME))
                            .with_text(issuer.clone()),
                    )
                    .with_child(
                        XmlElement::new(StartElement::new(TAG_DSIG_X509_SERIAL_NUMBER))
                            .with_text(serial.clone()),
                    ),
            ),
            Self::Certificate(encoded) => XmlElement::declaring(TAG_DSIG_X509_DATA).with_child(
                XmlElement::new(StartElement::new(TAG_DSIG_X509_CERTIFICATE))
                    .with_text(base64_encode(encoded)),
            ),
            Self::Embedded(token) => {
                XmlElement::new(StartElement::new(TAG_WSSE_EMBEDDED)).with_child(token.clone())
            }
        };
        XmlElement::declaring(TAG_WSSE_SECURITY_TOKEN_REFERENCE).with_child(child)
    }

    /// Find the token this reference points at. Tokens found through the
    /// keystore or the password callback are registered in `ctx` so later
    /// references resolve to the same instance.
    pub fn resolve(&self, ctx: &mut SecurityContext, properties: &SecurityProperties) -> WssResult<ResolvedToken> {
        match self {
            Self::Direct { uri, .. } => match uri.strip_prefix('#') {
                Some(id) => Ok(ResolvedToken {
                    token: ctx.security_token(id)?,
                    key_identifier: KeyIdentifierType::DirectReference,
                }),
                None => resolve_external(uri, ctx, properties),
            },
            Self::KeyIdentifier { value_type, value } => {
                let (criteria, key_identifier) = match value_type.as_str() {
                    NS_X509_SKI => (CryptoType::SubjectKeyIdentifier(value.clone()), KeyIdentifierType::SkiKeyIdentifier),
                    NS_THUMBPRINT => (CryptoType::Thumbprint(value.clone()), KeyIdentifierType::ThumbprintIdentifier),
                    NS_ENCRYPTED_KEY_SHA1 => {
                        let wanted = base64_encode(value);
                        let token = find_registered(ctx, |t| t.encrypted_key_sha1() == Some(wanted.as_str()))
                            .ok_or_else(|| unavailable(format!("EncryptedKeySHA1 {}", wanted)))?;
                        return Ok(ResolvedToken {
                            token,
                            key_identifier: KeyIdentifierType::EncryptedKeySha1,
                        });
                    }
                    other => {
                        return Err(WssError::new(
                            ErrorCode::UnsupportedSecurityToken,
                            format!("Unsupported KeyIdentifier ValueType {}", other),
                        ))
                    }
                };
                let registered = find_registered(ctx, |t| {
                    t.certificates().first().is_some_and(|c| matches_criteria(c, &criteria))
                });
                let token = match registered {
                    Some(token) => token,
                    None => certificate_token(ctx, properties, &criteria)?,
                };
                Ok(ResolvedToken { token, key_identifier })
            }
            Self::IssuerSerial { issuer, serial } => {
                let criteria = CryptoType::IssuerSerial {
                    issuer: issuer.clone(),
                    serial: serial.clone(),
                };
                Ok(ResolvedToken {
                    token: certificate_token(ctx, properties, &criteria)?,
                    key_identifier: KeyIdentifierType::IssuerSerial,
                })
            }
            Self::Certificate(encoded) => {
                let certificate = properties.credentials.load_certificate(encoded)?;
                Ok(ResolvedToken {
                    token: register_certificate(ctx, properties, certificate),
                    key_identifier: KeyIdentifierType::EmbeddedCertificate,
                })
            }
            Self::Embedded(element) => {
                if element.name() != &TAG_WSSE_BINARY_SECURITY_TOKEN {
                    return Err(WssError::new(
                        ErrorCode::UnsupportedSecurityToken,
                        format!("Unsupported embedded token {}", element.name()),
                    ));
                }
                let certificate = properties.credentials.load_certificate(&base64_decode(&element.text())?)?;
                Ok(ResolvedToken {
                    token: register_certificate(ctx, properties, certificate),
                    key_identifier: KeyIdentifierType::EmbeddedToken,
                })
            }
        }
    }
}

fn matches_criteria(certificate: &Certificate, criteria: &CryptoType) -> bool {
    match criteria {
        CryptoType::SubjectKeyIdentifier(ski) => certificate.subject_key_identifier.as_ref() == Some(ski),
        CryptoType::Thumbprint(thumbprint) => &certificate.thumbprint() == thumbprint,
        CryptoType::IssuerSerial { issuer, serial } => &certificate.issuer == issuer && &certificate.serial == serial,
        CryptoType::Alias(_) => false,
    }
}

fn find_registered<P>(ctx: &SecurityContext, predicate: P) -> Option<Rc<SecurityToken>>
where
    P: Fn(&SecurityToken) -> bool,
{
    let ids: Vec<String> = ctx.provider_ids().map(str::to_string).collect();
    ids.iter()
        .filter_map(|id| ctx.security_token(id).ok())
        .find(|token| predicate(token))
}

fn certificate_token(
    ctx: &mut SecurityContext,
    properties: &SecurityProperties,
    criteria: &CryptoType,
) -> WssResult<Rc<SecurityToken>> {
    let certificate = properties
        .credentials
        .get_x509_certificates(criteria)?
        .into_iter()
        .next()
        .ok_or_else(|| unavailable(format!("{:?}", criteria)))?;
    Ok(register_certificate(ctx, properties, certificate))
}

/// X.509 token for `certificate`, carrying the private key when the keystore
/// releases it.
fn register_certificate(
    ctx: &mut SecurityContext,
    properties: &SecurityProperties,
    certificate: Certificate,
) -> Rc<SecurityToken> {
    let id = format!("X509-{}", certificate.serial);
    if let Ok(existing) = ctx.security_token(&id) {
        if existing.certificates().first() == Some(&certificate) {
            return existing;
        }
    }
    let private = properties
        .credentials
        .get_private_key(&certificate, properties.callback.as_ref())
        .ok();
    let token = Rc::new(SecurityToken::x509(id.clone(), certificate, private));
    ctx.register_security_token_provider(id, Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))));
    token
}

/// A reference outside the message names a security context by its
/// identifier.
fn resolve_external(
    uri: &str,
    ctx: &mut SecurityContext,
    properties: &SecurityProperties,
) -> WssResult<ResolvedToken> {
    if let Ok(token) = ctx.security_token(uri) {
        return Ok(ResolvedToken {
            token,
            key_identifier: KeyIdentifierType::ExternalReference,
        });
    }
    let credential = properties
        .callback
        .resolve(uri, CallbackUsage::SecurityContextToken)
        .ok_or_else(|| unavailable(uri))?;
    let key = credential
        .key
        .or_else(|| credential.password.map(String::into_bytes))
        .ok_or_else(|| unavailable(uri))?;

    debug!(identifier = uri, "Resolved external security context");
    let mut token = SecurityToken::new(uri, TokenType::SecurityContextToken, KeyMaterial::Symmetric(key))
        .with_external_uri_ref(true)
        .with_key_identifier(KeyIdentifierType::ExternalReference);
    if let Some(issuer) = credential.issuer {
        token = token.with_issuer_name(issuer);
    }
    let token = Rc::new(token);
    ctx.register_security_token_provider(uri, Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))));
    Ok(ResolvedToken {
        token,
        key_identifier: KeyIdentifierType::ExternalReference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::credentials::test_keys;
    use crate::credentials::MemoryPasswordCallback;
    use crate::token::HasKeyPair;
    use std::sync::Arc;

    fn properties() -> SecurityProperties {
        let callback = MemoryPasswordCallback::new().with_secret("urn:ctx:1", vec![9; 32], Some("xs:anyURI".into()));
        SecurityProperties::new(SecurityConfig::default(), Arc::new(test_keys::store()), Arc::new(callback)).unwrap()
    }

    #[test]
    fn test_parse_and_render_issuer_serial() {
        let certificate = test_keys::certificate("alice", 0);
        let reference = SecurityTokenReference::issuer_serial(&certificate);
        let element = reference.to_element();
        assert_eq!(SecurityTokenReference::parse(&element).unwrap(), reference);
    }

    #[test]
    fn test_issuer_serial_resolves_with_private_key() {
        let mut ctx = SecurityContext::new();
        let properties = properties();
        let reference = SecurityTokenReference::issuer_serial(&test_keys::certificate("alice", 0));
        let resolved = reference.resolve(&mut ctx, &properties).unwrap();
        assert_eq!(resolved.key_identifier, KeyIdentifierType::IssuerSerial);
        assert!(resolved.token.private_key().is_some());

        // Second resolution reuses the registered token
        let again = reference.resolve(&mut ctx, &properties).unwrap();
        assert!(Rc::ptr_eq(&resolved.token, &again.token));
    }

    #[test]
    fn test_ski_and_thumbprint_resolve() {
        let mut ctx = SecurityContext::new();
        let properties = properties();
        let certificate = test_keys::certificate("alice", 0);
        let ski = SecurityTokenReference::subject_key_identifier(&certificate).unwrap();
        let resolved = ski.resolve(&mut ctx, &properties).unwrap();
        assert_eq!(resolved.key_identifier, KeyIdentifierType::SkiKeyIdentifier);

        let thumbprint = SecurityTokenReference::thumbprint(&certificate);
        let element = thumbprint.to_element();
        let resolved = SecurityTokenReference::parse(&element)
            .unwrap()
            .resolve(&mut ctx, &properties)
            .unwrap();
        assert_eq!(resolved.key_identifier, KeyIdentifierType::ThumbprintIdentifier);
    }

    #[test]
    fn test_external_reference_uses_callback() {
        let mut ctx = SecurityContext::new();
        let properties = properties();
        let resolved = SecurityTokenReference::direct("urn:ctx:1", None)
            .resolve(&mut ctx, &properties)
            .unwrap();
        assert_eq!(resolved.token.token_type(), TokenType::SecurityContextToken);
        assert!(resolved.token.is_external_uri_ref());
        assert_eq!(resolved.token.issuer_name(), Some("xs:anyURI"));
        assert!(ctx.security_token("urn:ctx:1").is_ok());
    }

    #[test]
    fn test_unknown_references_unavailable() {
        let mut ctx = SecurityContext::new();
        let properties = properties();
        let err = SecurityTokenReference::direct("#missing", None)
            .resolve(&mut ctx, &properties)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityTokenUnavailable);

        let err = SecurityTokenReference::IssuerSerial {
            issuer: "CN=Nobody".into(),
            serial: "1".into(),
        }
        .resolve(&mut ctx, &properties)
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityTokenUnavailable);
    }
}
