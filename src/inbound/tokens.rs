//! Handlers for token-bearing security header elements.

use super::header::HeaderScope;
use crate::bsp::BspRule;
use crate::chain::ChainContext;
use crate::constants::{
    is_wsc, ATT_NULL_ALGORITHM, ATT_NULL_TYPE, ATT_NULL_VALUE, ATT_NULL_VALUE_TYPE, NS_P_SHA1_0502,
    NS_PASSWORD_DIGEST, NS_PASSWORD_TEXT, NS_X509V3_TYPE, TAG_WSSE11_ITERATION, TAG_WSSE11_SALT,
    TAG_WSSE_NONCE, TAG_WSSE_PASSWORD, TAG_WSSE_SECURITY_TOKEN_REFERENCE, TAG_WSSE_USERNAME, TAG_WSU_CREATED,
    TAG_WSU_EXPIRES,
};
use crate::context::keys;
use crate::credentials::CallbackUsage;
use crate::crypto::base64_decode;
use crate::error::{ErrorCode, WssError, WssResult};
use crate::event::{AlgorithmSuiteEvent, AlgorithmUsage, SecurityEvent, TokenEvent, TokenUsage};
use crate::token::derived::{password_digest, username_token_key};
use crate::token::{
    DerivedKeyParams, KeyMaterial, LazyTokenProvider, SecurityToken, SecurityTokenReference, StaticTokenProvider,
    TokenType,
};
use crate::xml::XmlElement;
use chrono::{DateTime, Duration, Utc};
use std::rc::Rc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

const AUTHENTICATION_FAILED: &str = "The security token could not be authenticated or authorized";

fn required_id(element: &XmlElement) -> WssResult<String> {
    element.id().map(str::to_string).ok_or_else(|| {
        WssError::new(
            ErrorCode::InvalidSecurityToken,
            format!("{} has no wsu:Id", element.name().local()),
        )
    })
}

fn parse_time(value: &str) -> WssResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| WssError::invalid_security(format!("Invalid timestamp format: {}", value)))
}

/// `wsse:BinarySecurityToken`. The certificate is decoded when the token is
/// first referenced.
pub(super) fn binary_security_token(
    element: &XmlElement,
    _scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let value_type = element.attribute(&ATT_NULL_VALUE_TYPE).unwrap_or_default();
    if value_type != NS_X509V3_TYPE {
        return Err(WssError::new(
            ErrorCode::UnsupportedSecurityToken,
            format!("Unsupported BinarySecurityToken ValueType {}", value_type),
        ));
    }
    let id = required_id(element)?;
    let encoded = base64_decode(&element.text())?;

    let properties = chain.properties();
    let credentials = Arc::clone(&properties.credentials);
    let callback = Arc::clone(&properties.callback);
    let token_id = id.clone();
    let provider = LazyTokenProvider::new(id.clone(), move || {
        let certificate = credentials.load_certificate(&encoded)?;
        let private = credentials.get_private_key(&certificate, callback.as_ref()).ok();
        Ok(SecurityToken::x509(token_id.clone(), certificate, private))
    });
    chain
        .security_context()
        .register_security_token_provider(id, Rc::new(provider));
    Ok(())
}

/// `wsse:UsernameToken`: password check through the callback, or key
/// derivation when the token carries a salt.
pub(super) fn username_token(
    element: &XmlElement,
    _scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let config = &chain.properties().config.inbound.username_token;
    let username = element
        .child_text(&TAG_WSSE_USERNAME)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "UsernameToken without Username"))?;
    let created = element.child_text(&TAG_WSU_CREATED);
    if let Some(created) = &created {
        let age = Utc::now().signed_duration_since(parse_time(created)?);
        if age > Duration::seconds(config.max_age_secs as i64) {
            return Err(WssError::new(ErrorCode::MessageExpired, "UsernameToken has expired"));
        }
    }

    let credential = chain
        .properties()
        .callback
        .resolve(&username, CallbackUsage::UsernameToken);
    let stored = credential.as_ref().and_then(|c| c.password.clone());

    let id = element
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("UsernameToken-{}", Uuid::new_v4()));
    let mut token = match element.child(&TAG_WSSE_PASSWORD) {
        Some(password) => {
            let password_type = password.attribute(&ATT_NULL_TYPE).unwrap_or(NS_PASSWORD_TEXT).to_string();
            let supplied = password.text();
            let stored = stored.ok_or_else(|| {
                warn!(user = %username, "Unknown UsernameToken user");
                WssError::new(ErrorCode::FailedAuthentication, AUTHENTICATION_FAILED)
            })?;
            let expected = match password_type.as_str() {
                NS_PASSWORD_TEXT => {
                    if !config.allow_password_text {
                        return Err(WssError::new(
                            ErrorCode::FailedAuthentication,
                            "Plain text passwords are not accepted",
                        ));
                    }
                    stored
                }
                NS_PASSWORD_DIGEST => {
                    let nonce = element
                        .child_text(&TAG_WSSE_NONCE)
                        .map(|n| base64_decode(&n))
                        .transpose()?
                        .unwrap_or_default();
                    password_digest(&nonce, created.as_deref().unwrap_or_default(), &stored)
                }
                other => {
                    return Err(WssError::new(
                        ErrorCode::UnsupportedSecurityToken,
                        format!("Unsupported password type {}", other),
                    ))
                }
            };
            if !bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
                warn!(user = %username, "UsernameToken authentication failed");
                return Err(WssError::new(ErrorCode::FailedAuthentication, AUTHENTICATION_FAILED));
            }
            SecurityToken::new(id, TokenType::UsernameToken, KeyMaterial::None).with_password_type(password_type)
        }
        None => match element.child_text(&TAG_WSSE11_SALT) {
            Some(salt) => {
                let stored = stored
                    .ok_or_else(|| WssError::new(ErrorCode::FailedAuthentication, AUTHENTICATION_FAILED))?;
                let iterations = element
                    .child_text(&TAG_WSSE11_ITERATION)
                    .map(|i| i.parse::<usize>())
                    .transpose()
                    .map_err(|_| WssError::new(ErrorCode::InvalidSecurityToken, "Invalid Iteration"))?
                    .unwrap_or(1000);
                let key = username_token_key(&stored, &base64_decode(&salt)?, iterations);
                SecurityToken::new(id, TokenType::UsernameToken, KeyMaterial::Symmetric(key))
            }
            None => SecurityToken::new(id, TokenType::UsernameToken, KeyMaterial::None),
        },
    };
    token = token.with_username(username.clone());

    debug!(user = %username, "UsernameToken accepted");
    let token = Rc::new(token);
    let ctx = chain.security_context();
    ctx.put(keys::AUTHENTICATED_USER, username);
    ctx.register_security_token_provider(token.id(), Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))));
    ctx.register_security_event(SecurityEvent::Token(TokenEvent::for_token(&token, TokenUsage::SupportingTokens)))
}

/// `wsu:Timestamp` freshness.
pub(super) fn timestamp(element: &XmlElement, scope: &mut HeaderScope, chain: &mut ChainContext<'_>) -> WssResult<()> {
    scope.timestamps += 1;
    let created_count = element.children_named(&TAG_WSU_CREATED).count();
    let expires_count = element.children_named(&TAG_WSU_EXPIRES).count();
    scope.bsp.check(scope.timestamps > 1, BspRule::R3227);
    scope.bsp.check(created_count != 1, BspRule::R3203);
    scope.bsp.check(expires_count > 1, BspRule::R3224);
    scope.bsp.finish_structure()?;

    let config = &chain.properties().config.inbound.timestamp;
    let created = element
        .child_text(&TAG_WSU_CREATED)
        .ok_or_else(|| WssError::invalid_security("Timestamp has no Created"))?;
    let expires = element.child_text(&TAG_WSU_EXPIRES);
    let now = Utc::now();

    let age = now.signed_duration_since(parse_time(&created)?);
    if age < -Duration::seconds(config.future_ttl_secs as i64) {
        return Err(WssError::invalid_security("The timestamp is in the future"));
    }
    if config.strict && age > Duration::seconds(config.ttl_secs as i64) {
        return Err(WssError::new(
            ErrorCode::MessageExpired,
            format!("Timestamp is too old: {} seconds (max: {})", age.num_seconds(), config.ttl_secs),
        ));
    }
    if let Some(expires) = &expires {
        if now > parse_time(expires)? {
            return Err(WssError::new(ErrorCode::MessageExpired, "The message has expired"));
        }
    }

    chain
        .security_context()
        .register_security_event(SecurityEvent::Timestamp { created, expires })
}

/// `wsc:SecurityContextToken`. Its secret is shared out of band and comes
/// from the password callback; the token forwards to it.
pub(super) fn security_context_token(
    element: &XmlElement,
    _scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let identifier = element
        .elements()
        .find(|e| is_wsc(e.name(), "Identifier"))
        .map(XmlElement::text)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "SecurityContextToken without Identifier"))?;
    let credential = chain
        .properties()
        .callback
        .resolve(&identifier, CallbackUsage::SecurityContextToken)
        .ok_or_else(|| {
            WssError::new(
                ErrorCode::SecurityTokenUnavailable,
                format!("No secret for security context {}", identifier),
            )
        })?;
    let key = credential
        .key
        .or_else(|| credential.password.map(String::into_bytes))
        .ok_or_else(|| {
            WssError::new(
                ErrorCode::SecurityTokenUnavailable,
                format!("No secret for security context {}", identifier),
            )
        })?;

    let secret = Rc::new(SecurityToken::new(
        format!("{}#secret", identifier),
        TokenType::SharedSecret,
        KeyMaterial::Symmetric(key),
    ));
    let id = element.id().map(str::to_string).unwrap_or_else(|| identifier.clone());
    let mut token = SecurityToken::new(id.clone(), TokenType::SecurityContextToken, KeyMaterial::Delegated)
        .wrapping(&secret)?;
    if let Some(issuer) = credential.issuer {
        token = token.with_issuer_name(issuer);
    }
    let token = Rc::new(token);

    let ctx = chain.security_context();
    ctx.register_security_token_provider(secret.id().to_string(), Rc::new(StaticTokenProvider::from_rc(Rc::clone(&secret))));
    if id != identifier {
        ctx.register_security_token_provider(identifier, Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))));
    }
    ctx.register_security_token_provider(id, Rc::new(StaticTokenProvider::from_rc(token)));
    Ok(())
}

/// `wsc:DerivedKeyToken` over a referenced token.
pub(super) fn derived_key_token(
    element: &XmlElement,
    _scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let id = required_id(element)?;
    let reference = element
        .child(&TAG_WSSE_SECURITY_TOKEN_REFERENCE)
        .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "DerivedKeyToken without reference"))?;
    let reference = SecurityTokenReference::parse(reference)?;
    let properties = chain.properties();
    let base = reference.resolve(chain.security_context(), properties)?;

    let wsc_text = |local: &str| {
        element
            .elements()
            .find(|e| is_wsc(e.name(), local))
            .map(XmlElement::text)
    };
    let number = |local: &str| -> WssResult<Option<usize>> {
        wsc_text(local)
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|_| WssError::new(ErrorCode::InvalidSecurityToken, format!("Invalid {}", local)))
    };
    let nonce = wsc_text("Nonce")
        .ok_or_else(|| WssError::new(ErrorCode::InvalidSecurityToken, "DerivedKeyToken without Nonce"))?;

    let mut params = DerivedKeyParams::new(base64_decode(&nonce)?, number("Length")?.unwrap_or(32));
    params.algorithm = element
        .attribute(&ATT_NULL_ALGORITHM)
        .unwrap_or(NS_P_SHA1_0502)
        .to_string();
    params.offset = number("Offset")?.unwrap_or(0);
    params.generation = number("Generation")?;
    if let Some(label) = wsc_text("Label") {
        params.label = label;
    }
    let key_bits = params.length * 8;
    let algorithm = params.algorithm.clone();

    let token = SecurityToken::new(id.clone(), TokenType::DerivedKey, KeyMaterial::Derived(params))
        .wrapping(&base.token)?
        .with_key_identifier(base.key_identifier);
    let ctx = chain.security_context();
    ctx.register_security_token_provider(id, Rc::new(StaticTokenProvider::new(token)));
    ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
        algorithm,
        usage: AlgorithmUsage::KeyDerivation,
        key_length: Some(key_bits),
    }))
}

/// `wsse11:SignatureConfirmation`.
pub(super) fn signature_confirmation(
    element: &XmlElement,
    _scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let value = element.attribute(&ATT_NULL_VALUE).map(str::to_string);
    let ctx = chain.security_context();
    ctx.push(keys::SIGNATURE_CONFIRMATIONS, value.clone());
    ctx.register_security_event(SecurityEvent::SignatureConfirmation { value })
}
