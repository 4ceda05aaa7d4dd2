//! `wsc:SecurityContextToken` output.

use super::{insert_after_security_start, new_id};
use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{ATT_WSU_ID, TAG_WSC0502_IDENTIFIER, TAG_WSC0502_SECURITY_CONTEXT_TOKEN};
use crate::context::keys;
use crate::credentials::CallbackUsage;
use crate::error::{ErrorCode, WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::token::{KeyMaterial, SecurityToken, StaticTokenProvider, TokenType};
use crate::xml::{StartElement, XmlElement, XmlEvent};
use std::rc::Rc;
use tracing::debug;

/// Registers the security context token on the first event and installs the
/// processor that writes it.
pub struct SecurityContextTokenOutputProcessor {
    identifier: String,
    secret: Vec<u8>,
    issuer: Option<String>,
    external_reference: bool,
}

impl SecurityContextTokenOutputProcessor {
    /// The identifier comes from the outbound configuration; its secret from
    /// the password callback.
    pub fn new(properties: &SecurityProperties) -> WssResult<Self> {
        let config = &properties.config.outbound.security_context_token;
        let identifier = config
            .identifier
            .clone()
            .ok_or_else(|| WssError::config("The security_context_token action requires an identifier"))?;
        let credential = properties
            .callback
            .resolve(&identifier, CallbackUsage::SecurityContextToken)
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::SecurityTokenUnavailable,
                    format!("No secret for security context {}", identifier),
                )
            })?;
        let secret = credential
            .key
            .or_else(|| credential.password.map(String::into_bytes))
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::SecurityTokenUnavailable,
                    format!("No secret for security context {}", identifier),
                )
            })?;
        Ok(Self {
            identifier,
            secret,
            issuer: credential.issuer,
            external_reference: config.external_reference,
        })
    }

    fn register(&self, chain: &mut ChainContext<'_>) -> WssResult<String> {
        let id = new_id("SCT");
        let secret = Rc::new(SecurityToken::new(
            format!("{}#secret", self.identifier),
            TokenType::SharedSecret,
            KeyMaterial::Symmetric(self.secret.clone()),
        ));
        let mut token = SecurityToken::new(id.clone(), TokenType::SecurityContextToken, KeyMaterial::Delegated)
            .wrapping(&secret)?
            .with_external_uri_ref(self.external_reference);
        if let Some(issuer) = &self.issuer {
            token = token.with_issuer_name(issuer.clone());
        }
        let token = Rc::new(token);

        let ctx = chain.security_context();
        ctx.register_security_token_provider(secret.id().to_string(), Rc::new(StaticTokenProvider::from_rc(Rc::clone(&secret))));
        ctx.register_security_token_provider(
            self.identifier.clone(),
            Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))),
        );
        ctx.register_security_token_provider(id.clone(), Rc::new(StaticTokenProvider::from_rc(token)));
        ctx.put(keys::USE_THIS_TOKEN_ID_FOR_SECURITY_CONTEXT_TOKEN, id.clone());
        Ok(id)
    }
}

impl Processor for SecurityContextTokenOutputProcessor {
    fn id(&self) -> &str {
        "security-context-token"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let id = self.register(chain)?;
        debug!(identifier = %self.identifier, id = %id, "Security context token registered");
        if !self.external_reference {
            let element = XmlElement::declaring(TAG_WSC0502_SECURITY_CONTEXT_TOKEN)
                .with_attribute(ATT_WSU_ID, id)
                .with_child(
                    XmlElement::new(StartElement::new(TAG_WSC0502_IDENTIFIER)).with_text(self.identifier.clone()),
                );
            chain.add_processor(Box::new(FinalSecurityContextTokenOutputProcessor { element }))?;
        }
        chain.output(event)?;
        chain.remove_self();
        Ok(())
    }
}

/// Writes the token. Runs after every processor that refers to it.
pub struct FinalSecurityContextTokenOutputProcessor {
    element: XmlElement,
}

impl Processor for FinalSecurityContextTokenOutputProcessor {
    fn id(&self) -> &str {
        "final-security-context-token"
    }

    fn phase(&self) -> Phase {
        Phase::Postprocessing
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if insert_after_security_start(event, std::slice::from_ref(&self.element), chain)? {
            chain.remove_self();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::credentials::{test_keys, MemoryPasswordCallback};
    use std::sync::Arc;

    fn properties(identifier: Option<&str>) -> SecurityProperties {
        let mut config = SecurityConfig::default();
        config.outbound.security_context_token.identifier = identifier.map(str::to_string);
        SecurityProperties::new(
            config,
            Arc::new(test_keys::store()),
            Arc::new(MemoryPasswordCallback::new().with_password("urn:ctx:1", "shared")),
        )
        .unwrap()
    }

    #[test]
    fn test_secret_resolved_through_callback() {
        let processor = SecurityContextTokenOutputProcessor::new(&properties(Some("urn:ctx:1"))).unwrap();
        assert_eq!(processor.secret, b"shared".to_vec());
        assert!(!processor.external_reference);
    }

    #[test]
    fn test_unknown_context_is_unavailable() {
        let err = SecurityContextTokenOutputProcessor::new(&properties(Some("urn:ctx:2")))
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::SecurityTokenUnavailable);
        assert!(SecurityContextTokenOutputProcessor::new(&properties(None)).is_err());
    }
}
