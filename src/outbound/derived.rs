//! `wsc:DerivedKeyToken` output over the message's security context token.

use super::{insert_after_security_start, new_id};
use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{
    ATT_NULL_ALGORITHM, ATT_WSU_ID, NS_P_SHA1_0502, NS_SCT_0502_TOKEN_TYPE, TAG_WSC0502_DERIVED_KEY_TOKEN,
    TAG_WSC0502_LENGTH, TAG_WSC0502_NONCE,
};
use crate::context::keys;
use crate::crypto::{base64_encode, random_bytes, symmetric_key_length};
use crate::error::{WssError, WssResult};
use crate::token::{DerivedKeyParams, KeyMaterial, SecurityToken, SecurityTokenReference, StaticTokenProvider, TokenType};
use crate::xml::{StartElement, XmlElement, XmlEvent};
use std::rc::Rc;
use tracing::debug;

/// What a derived key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKeyPurpose {
    Signature,
    Encryption,
}

impl DerivedKeyPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Encryption => "encryption",
        }
    }
}

/// Registers a key derived from the security context token on the first
/// event and installs the processor that writes it.
pub struct DerivedKeyTokenOutputProcessor {
    id: String,
    token_id: String,
    purpose: DerivedKeyPurpose,
    suffix: String,
}

impl DerivedKeyTokenOutputProcessor {
    pub fn new(purpose: DerivedKeyPurpose, suffix: &str) -> Self {
        Self {
            id: format!("derived-key-{}{}", purpose.as_str(), suffix),
            token_id: new_id("DK"),
            purpose,
            suffix: suffix.to_string(),
        }
    }

    /// Id the derived key token is registered and referenced under.
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    fn key_length(&self, chain: &ChainContext<'_>) -> WssResult<usize> {
        let config = &chain.properties().config.outbound;
        match self.purpose {
            DerivedKeyPurpose::Signature => Ok(config.derived_key_length),
            DerivedKeyPurpose::Encryption => symmetric_key_length(&config.encryption_symmetric_algorithm),
        }
    }

    fn register(&self, chain: &mut ChainContext<'_>) -> WssResult<XmlElement> {
        let length = self.key_length(chain)?;
        let external_identifier = chain
            .properties()
            .config
            .outbound
            .security_context_token
            .identifier
            .clone();
        let ctx = chain.security_context();
        let base_id = ctx
            .get(keys::USE_THIS_TOKEN_ID_FOR_SECURITY_CONTEXT_TOKEN)
            .cloned()
            .ok_or_else(|| WssError::config("Derived keys require a security context token"))?;
        let base = ctx.security_token(&base_id)?;

        let params = DerivedKeyParams::new(random_bytes(16), length);
        let nonce = base64_encode(&params.nonce);
        let token = SecurityToken::new(self.token_id.clone(), TokenType::DerivedKey, KeyMaterial::Derived(params))
            .wrapping(&base)?;
        ctx.register_security_token_provider(self.token_id.clone(), Rc::new(StaticTokenProvider::new(token)));
        ctx.put(keys::USE_THIS_TOKEN_ID_FOR_DERIVED_KEY, self.token_id.clone());
        let use_key = match self.purpose {
            DerivedKeyPurpose::Signature => keys::USE_THIS_TOKEN_ID_FOR_SIGNATURE,
            DerivedKeyPurpose::Encryption => keys::USE_THIS_TOKEN_ID_FOR_ENCRYPTION,
        };
        ctx.put(use_key, self.token_id.clone());

        let reference = match external_identifier.filter(|_| base.is_external_uri_ref()) {
            Some(identifier) => SecurityTokenReference::direct(identifier, Some(NS_SCT_0502_TOKEN_TYPE)),
            None => SecurityTokenReference::direct(format!("#{}", base_id), Some(NS_SCT_0502_TOKEN_TYPE)),
        };
        Ok(XmlElement::declaring(TAG_WSC0502_DERIVED_KEY_TOKEN)
            .with_attribute(ATT_WSU_ID, self.token_id.clone())
            .with_attribute(ATT_NULL_ALGORITHM, NS_P_SHA1_0502)
            .with_child(reference.to_element())
            .with_child(XmlElement::new(StartElement::new(TAG_WSC0502_LENGTH)).with_text(length.to_string()))
            .with_child(XmlElement::new(StartElement::new(TAG_WSC0502_NONCE)).with_text(nonce)))
    }
}

impl Processor for DerivedKeyTokenOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn after(&self) -> Vec<String> {
        vec!["security-context-token".to_string()]
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let element = self.register(chain)?;
        debug!(token = %self.token_id, purpose = self.purpose.as_str(), "Derived key registered");
        chain.add_processor(Box::new(FinalDerivedKeyTokenOutputProcessor {
            id: format!("final-derived-key-{}{}", self.purpose.as_str(), self.suffix),
            element,
        }))?;
        chain.output(event)?;
        chain.remove_self();
        Ok(())
    }
}

/// Writes the derived key token. The security context token it refers to
/// is inserted after it and so precedes it in the header.
pub struct FinalDerivedKeyTokenOutputProcessor {
    id: String,
    element: XmlElement,
}

impl Processor for FinalDerivedKeyTokenOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        Phase::Postprocessing
    }

    fn before(&self) -> Vec<String> {
        vec!["final-security-context-token".to_string()]
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if insert_after_security_start(event, std::slice::from_ref(&self.element), chain)? {
            chain.remove_self();
        }
        Ok(())
    }
}
