//! `xenc:EncryptedData` and `xenc:EncryptedKey` output.
//!
//! [`EncryptOutputProcessor`] replaces the body content, and any configured
//! element, with `EncryptedData`. [`EncryptEndingOutputProcessor`] inserts
//! the key material and the reference list into the header once the
//! document ends.

use super::bst::BinarySecurityTokenOutputProcessor;
use super::{certificate_reference, new_id, HeaderBuffer, Recipient};
use crate::chain::{ChainContext, Processor};
use crate::constants::{
    is_body, ALG_KEYTRANSPORT_RSA15, ALG_SHA1, ATT_NULL_ALGORITHM, ATT_NULL_ID, ATT_NULL_TYPE, ATT_NULL_URI,
    NS_DKT_0502_TOKEN_TYPE, NS_XENC_TYPE_CONTENT, NS_XENC_TYPE_ELEMENT, TAG_DSIG_DIGEST_METHOD, TAG_DSIG_KEY_INFO,
    TAG_XENC_CIPHER_DATA, TAG_XENC_CIPHER_VALUE, TAG_XENC_DATA_REFERENCE, TAG_XENC_ENCRYPTED_DATA,
    TAG_XENC_ENCRYPTED_KEY, TAG_XENC_ENCRYPTION_METHOD, TAG_XENC_REFERENCE_LIST,
};
use crate::crypto::{
    base64_encode, encrypt_data, generate_symmetric_key, wrap_key, KeyTransport, PERMITTED_DATA_ALGORITHMS,
};
use crate::error::{WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::token::{HasSymmetricKey, SecurityTokenReference};
use crate::xml::{events_to_string, QName, StartElement, XmlElement, XmlEvent};
use rsa::RsaPublicKey;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

type SharedIds = Rc<RefCell<Vec<String>>>;

/// Processors for one encryption action.
pub(crate) fn processors(
    properties: &SecurityProperties,
    recipient: Recipient,
    suffix: &str,
) -> WssResult<Vec<Box<dyn Processor>>> {
    let config = &properties.config.outbound;
    let algorithm = config.encryption_symmetric_algorithm.clone();
    if !PERMITTED_DATA_ALGORITHMS.contains(&algorithm.as_str()) {
        return Err(WssError::unsupported_algorithm(&algorithm));
    }
    let ids: SharedIds = Rc::new(RefCell::new(Vec::new()));
    let mut processors: Vec<Box<dyn Processor>> = Vec::new();

    let (key, wrapping) = match recipient {
        Recipient::Certificate(certificate) => {
            let session = generate_symmetric_key(&algorithm)?;
            let (reference, bst) = certificate_reference(&certificate, config.encryption_key_identifier)?;
            if let Some(bst) = bst {
                processors.push(Box::new(BinarySecurityTokenOutputProcessor::new(bst)));
            }
            let wrapping = KeyWrapping {
                transport: KeyTransport::new(config.key_transport_algorithm.clone()),
                recipient: certificate.public_key.clone(),
                reference,
                session: session.clone(),
            };
            (DataKey::Session(session), Some(wrapping))
        }
        Recipient::DerivedKey { token_id } => (DataKey::Token(token_id), None),
    };

    let encrypt = EncryptOutputProcessor {
        id: format!("encrypt{}", suffix),
        algorithm,
        key,
        parts: config.encryption_parts.iter().map(|p| QName::parse(p)).collect(),
        ids: Rc::clone(&ids),
        active: None,
    };
    let ending = EncryptEndingOutputProcessor {
        id: format!("encrypt-ending{}", suffix),
        wrapping,
        ids,
        buffer: HeaderBuffer::default(),
    };
    processors.insert(0, Box::new(ending));
    processors.insert(0, Box::new(encrypt));
    Ok(processors)
}

enum DataKey {
    /// Random key transported in an `EncryptedKey`
    Session(Vec<u8>),
    /// Secret of a token registered in the security context
    Token(String),
}

struct ActiveEncryption {
    content: bool,
    events: Vec<XmlEvent>,
    depth: usize,
}

/// Encrypts the body content and configured elements.
pub struct EncryptOutputProcessor {
    id: String,
    algorithm: String,
    key: DataKey,
    parts: Vec<QName>,
    ids: SharedIds,
    active: Option<ActiveEncryption>,
}

impl EncryptOutputProcessor {
    fn encrypted_data(&self, active: &ActiveEncryption, chain: &mut ChainContext<'_>) -> WssResult<XmlElement> {
        let (key, key_info) = match &self.key {
            DataKey::Session(key) => (key.clone(), None),
            DataKey::Token(token_id) => {
                let key = chain
                    .security_context()
                    .security_token(token_id)?
                    .secret_key(&self.algorithm)?;
                let reference = SecurityTokenReference::direct(format!("#{}", token_id), Some(NS_DKT_0502_TOKEN_TYPE));
                (key, Some(reference))
            }
        };
        let plaintext = events_to_string(&active.events)?;
        let ciphertext = encrypt_data(&self.algorithm, &key, plaintext.as_bytes())?;

        let id = new_id("ED");
        self.ids.borrow_mut().push(id.clone());
        debug!(id = %id, content = active.content, algorithm = %self.algorithm, "Encrypting");

        let data_type = if active.content {
            NS_XENC_TYPE_CONTENT
        } else {
            NS_XENC_TYPE_ELEMENT
        };
        let mut encrypted = XmlElement::declaring(TAG_XENC_ENCRYPTED_DATA)
            .with_attribute(ATT_NULL_ID, id)
            .with_attribute(ATT_NULL_TYPE, data_type)
            .with_child(
                XmlElement::new(StartElement::new(TAG_XENC_ENCRYPTION_METHOD))
                    .with_attribute(ATT_NULL_ALGORITHM, self.algorithm.clone()),
            );
        if let Some(reference) = key_info {
            encrypted.push_child(XmlElement::declaring(TAG_DSIG_KEY_INFO).with_child(reference.to_element()));
        }
        encrypted.push_child(cipher_data(&ciphertext));
        Ok(encrypted)
    }
}

fn cipher_data(ciphertext: &[u8]) -> XmlElement {
    XmlElement::new(StartElement::new(TAG_XENC_CIPHER_DATA))
        .with_child(XmlElement::new(StartElement::new(TAG_XENC_CIPHER_VALUE)).with_text(base64_encode(ciphertext)))
}

impl Processor for EncryptOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if let Some(active) = self.active.as_mut() {
            if active.content && active.depth == 0 && matches!(event, XmlEvent::EndElement(_)) {
                // End of the element whose content is encrypted
                if let Some(active) = self.active.take() {
                    let encrypted = self.encrypted_data(&active, chain)?;
                    chain.output_element(&encrypted)?;
                }
                return chain.output(event);
            }
            match &event {
                XmlEvent::StartElement(_) => active.depth += 1,
                XmlEvent::EndElement(_) => active.depth -= 1,
                _ => {}
            }
            active.events.push(event);
            if !active.content && active.depth == 0 {
                if let Some(active) = self.active.take() {
                    let encrypted = self.encrypted_data(&active, chain)?;
                    chain.output_element(&encrypted)?;
                }
            }
            return Ok(());
        }

        if let Some(start) = event.as_start_element() {
            let document = chain.document();
            if !document.in_security_header() {
                if document.depth() == 2 && is_body(&start.name) {
                    self.active = Some(ActiveEncryption {
                        content: true,
                        events: Vec::new(),
                        depth: 0,
                    });
                    return chain.output(event);
                }
                if self.parts.contains(&start.name) {
                    self.active = Some(ActiveEncryption {
                        content: false,
                        events: vec![event],
                        depth: 1,
                    });
                    return Ok(());
                }
            }
        }
        chain.output(event)
    }
}

struct KeyWrapping {
    transport: KeyTransport,
    recipient: RsaPublicKey,
    reference: SecurityTokenReference,
    session: Vec<u8>,
}

/// Inserts the `EncryptedKey`, or a bare `ReferenceList` for keys the
/// receiver derives itself.
pub struct EncryptEndingOutputProcessor {
    id: String,
    wrapping: Option<KeyWrapping>,
    ids: SharedIds,
    buffer: HeaderBuffer,
}

impl EncryptEndingOutputProcessor {
    fn reference_list(&self, declaring: bool) -> XmlElement {
        let mut list = if declaring {
            XmlElement::declaring(TAG_XENC_REFERENCE_LIST)
        } else {
            XmlElement::new(StartElement::new(TAG_XENC_REFERENCE_LIST))
        };
        for id in self.ids.borrow().iter() {
            list.push_child(
                XmlElement::new(StartElement::new(TAG_XENC_DATA_REFERENCE)).with_attribute(ATT_NULL_URI, format!("#{}", id)),
            );
        }
        list
    }

    fn header_element(&self) -> WssResult<XmlElement> {
        let Some(wrapping) = &self.wrapping else {
            return Ok(self.reference_list(true));
        };
        let wrapped = wrap_key(&wrapping.transport, &wrapping.recipient, &wrapping.session)?;
        let mut method = XmlElement::new(StartElement::new(TAG_XENC_ENCRYPTION_METHOD))
            .with_attribute(ATT_NULL_ALGORITHM, wrapping.transport.algorithm.clone());
        if wrapping.transport.algorithm != ALG_KEYTRANSPORT_RSA15 {
            method.push_child(XmlElement::declaring(TAG_DSIG_DIGEST_METHOD).with_attribute(ATT_NULL_ALGORITHM, ALG_SHA1));
        }
        Ok(XmlElement::declaring(TAG_XENC_ENCRYPTED_KEY)
            .with_attribute(ATT_NULL_ID, new_id("EK"))
            .with_child(method)
            .with_child(XmlElement::declaring(TAG_DSIG_KEY_INFO).with_child(wrapping.reference.to_element()))
            .with_child(cipher_data(&wrapped))
            .with_child(self.reference_list(false)))
    }
}

impl Processor for EncryptEndingOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let Some(events) = self.buffer.push(event, chain)? else {
            return Ok(());
        };
        if self.ids.borrow().is_empty() {
            return HeaderBuffer::flush(events, &[], chain);
        }
        let element = self.header_element()?;
        HeaderBuffer::flush(events, &[element], chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ALG_KEYTRANSPORT_RSAOAEP;
    use crate::credentials::test_keys;
    use crate::crypto::{base64_decode, unwrap_key};

    #[test]
    fn test_encrypted_key_wraps_session_for_recipient() {
        let certificate = test_keys::certificate("bob", 1);
        let processor = EncryptEndingOutputProcessor {
            id: "encrypt-ending".into(),
            wrapping: Some(KeyWrapping {
                transport: KeyTransport::new(ALG_KEYTRANSPORT_RSAOAEP),
                recipient: certificate.public_key.clone(),
                reference: SecurityTokenReference::issuer_serial(&certificate),
                session: vec![9; 16],
            }),
            ids: Rc::new(RefCell::new(vec!["ED-1".into()])),
            buffer: HeaderBuffer::default(),
        };
        let element = processor.header_element().unwrap();
        assert_eq!(element.name(), &TAG_XENC_ENCRYPTED_KEY);
        let wrapped = element
            .child(&TAG_XENC_CIPHER_DATA)
            .and_then(|c| c.child_text(&TAG_XENC_CIPHER_VALUE))
            .unwrap();
        let key = unwrap_key(
            &KeyTransport::new(ALG_KEYTRANSPORT_RSAOAEP),
            &test_keys::rsa_key(1),
            &base64_decode(&wrapped).unwrap(),
        )
        .unwrap();
        assert_eq!(key, vec![9; 16]);
        let reference = element
            .child(&TAG_XENC_REFERENCE_LIST)
            .and_then(|l| l.child(&TAG_XENC_DATA_REFERENCE))
            .and_then(|r| r.attribute(&ATT_NULL_URI));
        assert_eq!(reference, Some("#ED-1"));
    }

    #[test]
    fn test_derived_key_gets_bare_reference_list() {
        let processor = EncryptEndingOutputProcessor {
            id: "encrypt-ending".into(),
            wrapping: None,
            ids: Rc::new(RefCell::new(vec!["ED-1".into(), "ED-2".into()])),
            buffer: HeaderBuffer::default(),
        };
        let element = processor.header_element().unwrap();
        assert_eq!(element.name(), &TAG_XENC_REFERENCE_LIST);
        assert_eq!(element.children_named(&TAG_XENC_DATA_REFERENCE).count(), 2);
    }
}
