//! Replaces referenced `xenc:EncryptedData` elements with their plaintext.

use crate::bsp::BspRule;
use crate::chain::{ChainContext, Processor};
use crate::constants::{
    ATT_NULL_ALGORITHM, ATT_NULL_TYPE, NS_XENC_TYPE_CONTENT, NS_XENC_TYPE_ELEMENT, TAG_DSIG_KEY_INFO,
    TAG_XENC_CIPHER_DATA, TAG_XENC_CIPHER_VALUE, TAG_XENC_ENCRYPTED_DATA, TAG_XENC_ENCRYPTION_METHOD,
};
use crate::context::keys;
use crate::crypto::{base64_decode, decrypt_data, PERMITTED_DATA_ALGORITHMS};
use crate::error::{WssError, WssResult};
use crate::event::{AlgorithmSuiteEvent, AlgorithmUsage, SecurityEvent, TokenEvent, TokenUsage};
use crate::token::{HasSymmetricKey, SecurityToken, SecurityTokenReference};
use crate::xml::{parse_fragment, Namespace, QName, XmlElement, XmlEvent};
use std::rc::Rc;
use tracing::debug;

/// Decrypts the `EncryptedData` elements named by one reference list.
pub struct DecryptProcessor {
    id: String,
    references: Vec<String>,
    decrypted: Vec<String>,
    /// Key of the enclosing `EncryptedKey`; otherwise each element's
    /// `KeyInfo` names its key
    key: Option<Rc<SecurityToken>>,
    buffer: Option<Buffered>,
    /// `Id` of every open element seen since installation
    ancestor_ids: Vec<Option<String>>,
}

struct Buffered {
    events: Vec<XmlEvent>,
    depth: usize,
    parent_path: Vec<QName>,
    in_scope: Vec<Namespace>,
    ancestor_ids: Vec<String>,
}

impl DecryptProcessor {
    pub fn new(id: String, references: Vec<String>, key: Option<Rc<SecurityToken>>) -> Self {
        Self {
            id,
            references,
            decrypted: Vec::new(),
            key,
            buffer: None,
            ancestor_ids: Vec::new(),
        }
    }

    /// Whether a signature reference names the element or one of its
    /// ancestors. References still waiting for their digest count, since
    /// they fail the message at its end if they never verify.
    fn is_signed(id: &str, ancestors: &[String], chain: &mut ChainContext<'_>) -> bool {
        let signed = chain.security_context().list(keys::SIGNED_REFERENCE_IDS);
        signed.iter().any(|s| s == id || ancestors.contains(s))
    }

    fn is_referenced(&self, event: &XmlEvent) -> bool {
        event.as_start_element().is_some_and(|start| {
            start.name == TAG_XENC_ENCRYPTED_DATA
                && start
                    .id()
                    .is_some_and(|id| self.references.iter().any(|r| r == id) && !self.decrypted.iter().any(|d| d == id))
        })
    }

    fn key_token(&self, encrypted: &XmlElement, chain: &mut ChainContext<'_>) -> WssResult<Rc<SecurityToken>> {
        if let Some(token) = &self.key {
            return Ok(Rc::clone(token));
        }
        let key_info = encrypted
            .child(&TAG_DSIG_KEY_INFO)
            .ok_or_else(|| WssError::invalid_security("EncryptedData has no KeyInfo"))?;
        let properties = chain.properties();
        let resolved = SecurityTokenReference::from_key_info(key_info)?.resolve(chain.security_context(), properties)?;
        let mut event = TokenEvent::for_token(&resolved.token, TokenUsage::MainEncryption);
        event.key_identifier = Some(resolved.key_identifier);
        chain
            .security_context()
            .register_security_event(SecurityEvent::Token(event))?;
        Ok(resolved.token)
    }

    fn decrypt(&mut self, buffered: Buffered, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let encrypted = XmlElement::from_events(&buffered.events)?;
        let id = encrypted.id().unwrap_or_default().to_string();

        let method = encrypted.child(&TAG_XENC_ENCRYPTION_METHOD);
        let algorithm = method
            .and_then(|m| m.attribute(&ATT_NULL_ALGORITHM))
            .unwrap_or_default()
            .to_string();
        let mut bsp = chain.properties().bsp_enforcer();
        bsp.check(method.is_none(), BspRule::R5601);
        bsp.check(
            method.is_some() && !PERMITTED_DATA_ALGORITHMS.contains(&algorithm.as_str()),
            BspRule::R5620,
        );
        bsp.finish_structure()?;
        if !PERMITTED_DATA_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(WssError::unsupported_algorithm(&algorithm));
        }

        let properties = chain.properties();
        if properties.config.inbound.require_signed_encrypted_data_elements
            && !Self::is_signed(&id, &buffered.ancestor_ids, chain)
        {
            return Err(WssError::invalid_security(format!(
                "EncryptedData {} is not covered by a signature",
                id
            )));
        }
        if let Some(suite) = &properties.algorithm_suite {
            suite.check_symmetric_encryption(&algorithm)?;
        }

        let token = self.key_token(&encrypted, chain)?;
        let cipher_value = encrypted
            .child(&TAG_XENC_CIPHER_DATA)
            .and_then(|c| c.child_text(&TAG_XENC_CIPHER_VALUE))
            .ok_or_else(|| WssError::invalid_security("EncryptedData has no CipherValue"))?;
        let ciphertext = base64_decode(&cipher_value)?;

        let key = token.secret_key(&algorithm)?;
        let plaintext = decrypt_data(&algorithm, &key, &ciphertext)?;
        let content = String::from_utf8(plaintext).map_err(|_| WssError::masked())?;
        let events = parse_fragment(&content, &buffered.in_scope).map_err(|_| WssError::masked())?;

        let content_only = match encrypted.attribute(&ATT_NULL_TYPE) {
            Some(NS_XENC_TYPE_CONTENT) => true,
            Some(NS_XENC_TYPE_ELEMENT) | None => false,
            Some(other) => {
                return Err(WssError::invalid_security(format!("Unsupported EncryptedData Type {}", other)))
            }
        };
        let mut path = buffered.parent_path;
        if !content_only {
            if let Some(name) = events.iter().find_map(XmlEvent::as_start_element).map(|s| s.name.clone()) {
                path.push(name);
            }
        }

        debug!(id = %id, algorithm = %algorithm, "EncryptedData decrypted");
        self.decrypted.push(id);
        let ctx = chain.security_context();
        ctx.push(keys::ENCRYPTED_PATHS, path);
        ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
            algorithm,
            usage: AlgorithmUsage::SymmetricEncryption,
            key_length: Some(key.len() * 8),
        }))?;
        for event in events {
            chain.output(event)?;
        }
        Ok(())
    }
}

impl Processor for DecryptProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if let Some(buffered) = self.buffer.as_mut() {
            match &event {
                XmlEvent::StartElement(_) => buffered.depth += 1,
                XmlEvent::EndElement(_) => buffered.depth -= 1,
                _ => {}
            }
            buffered.events.push(event);
            if buffered.depth == 0 {
                if let Some(buffered) = self.buffer.take() {
                    return self.decrypt(buffered, chain);
                }
            }
            return Ok(());
        }

        if self.is_referenced(&event) {
            let document = chain.document();
            let path = document.path();
            self.buffer = Some(Buffered {
                events: vec![event],
                depth: 1,
                parent_path: path[..path.len().saturating_sub(1)].to_vec(),
                in_scope: document.parent_namespaces(),
                ancestor_ids: self.ancestor_ids.iter().flatten().cloned().collect(),
            });
            return Ok(());
        }

        match &event {
            XmlEvent::StartElement(start) => self.ancestor_ids.push(start.id().map(str::to_string)),
            XmlEvent::EndElement(_) => {
                self.ancestor_ids.pop();
            }
            _ => {}
        }

        if matches!(event, XmlEvent::EndDocument) {
            if let Some(missing) = self.references.iter().find(|r| !self.decrypted.contains(*r)) {
                return Err(WssError::invalid_security(format!(
                    "Referenced EncryptedData {} was not found",
                    missing
                )));
            }
        }
        chain.output(event)
    }
}
