//! `ds:Signature` output.
//!
//! [`SignatureOutputProcessor`] digests the signed elements as they stream
//! past; [`SignatureEndingOutputProcessor`] holds the header back, signs the
//! collected references once the document ends and inserts the signature.

use super::{certificate_reference, new_id, HeaderBuffer, Signer};
use super::bst::BinarySecurityTokenOutputProcessor;
use crate::chain::{ChainContext, Processor};
use crate::constants::{
    is_body, ALG_EXC_C14N, ALG_HMAC_SHA1, ATT_NULL_ALGORITHM, ATT_NULL_ID, ATT_NULL_URI, ATT_WSU_ID,
    NS_DKT_0502_TOKEN_TYPE, TAG_DSIG_CANONICALIZATION_METHOD, TAG_DSIG_DIGEST_METHOD, TAG_DSIG_DIGEST_VALUE,
    TAG_DSIG_KEY_INFO, TAG_DSIG_REFERENCE, TAG_DSIG_SIGNATURE, TAG_DSIG_SIGNATURE_METHOD, TAG_DSIG_SIGNATURE_VALUE,
    TAG_DSIG_SIGNED_INFO, TAG_DSIG_TRANSFORM, TAG_DSIG_TRANSFORMS, TAG_WSSE11_SIGNATURE_CONFIRMATION,
    TAG_WSU_TIMESTAMP,
};
use crate::context::keys;
use crate::crypto::signature::is_hmac;
use crate::crypto::{base64_encode, digest, sign, SigningKey};
use crate::error::{WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::token::{HasSymmetricKey, SecurityTokenReference};
use crate::xml::c14n::{canonicalize, canonicalize_element};
use crate::xml::{QName, StartElement, XmlElement, XmlEvent};
use rsa::RsaPrivateKey;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone)]
struct SignedReference {
    id: String,
    digest_value: Vec<u8>,
}

type SharedReferences = Rc<RefCell<Vec<SignedReference>>>;

/// Processors for one signature action.
pub(crate) fn processors(
    properties: &SecurityProperties,
    signer: Signer,
    suffix: &str,
) -> WssResult<Vec<Box<dyn Processor>>> {
    let config = &properties.config.outbound;
    let references: SharedReferences = Rc::new(RefCell::new(Vec::new()));
    let parts = config.signature_parts.iter().map(|p| QName::parse(p)).collect();
    let signing = SignatureOutputProcessor {
        id: format!("signature{}", suffix),
        digest_algorithm: config.digest_algorithm.clone(),
        parts,
        references: Rc::clone(&references),
        active: Vec::new(),
    };

    let mut processors: Vec<Box<dyn Processor>> = vec![Box::new(signing)];
    let (method, key, key_info) = match signer {
        Signer::Certificate(certificate, private) => {
            if is_hmac(&config.signature_algorithm) {
                return Err(WssError::config(format!(
                    "{} needs a symmetric key, not a certificate",
                    config.signature_algorithm
                )));
            }
            let private = private.ok_or_else(|| WssError::config("No private key for the signature user"))?;
            let (reference, bst) = certificate_reference(&certificate, config.signature_key_identifier)?;
            if let Some(bst) = bst {
                processors.push(Box::new(BinarySecurityTokenOutputProcessor::new(bst)));
            }
            (config.signature_algorithm.clone(), SignatureKey::Rsa(private), reference)
        }
        Signer::DerivedKey { token_id } => {
            let method = if is_hmac(&config.signature_algorithm) {
                config.signature_algorithm.clone()
            } else {
                ALG_HMAC_SHA1.to_string()
            };
            let reference = SecurityTokenReference::direct(format!("#{}", token_id), Some(NS_DKT_0502_TOKEN_TYPE));
            (method, SignatureKey::Token(token_id), reference)
        }
    };

    processors.insert(
        1,
        Box::new(SignatureEndingOutputProcessor {
            id: format!("signature-ending{}", suffix),
            method,
            digest_algorithm: config.digest_algorithm.clone(),
            key,
            key_info,
            references,
            buffer: HeaderBuffer::default(),
        }),
    );
    Ok(processors)
}

struct ActiveDigest {
    id: String,
    events: Vec<XmlEvent>,
    depth: usize,
}

/// Digests the body, the timestamp, signature confirmations and configured
/// parts, adding a `wsu:Id` where one is missing.
pub struct SignatureOutputProcessor {
    id: String,
    digest_algorithm: String,
    parts: Vec<QName>,
    references: SharedReferences,
    active: Vec<ActiveDigest>,
}

impl SignatureOutputProcessor {
    fn is_signed(&self, start: &StartElement, chain: &ChainContext<'_>) -> bool {
        let document = chain.document();
        if document.in_security_header() {
            return document.depth() == 4
                && (start.name == TAG_WSU_TIMESTAMP || start.name == TAG_WSSE11_SIGNATURE_CONFIRMATION);
        }
        (document.depth() == 2 && is_body(&start.name)) || self.parts.contains(&start.name)
    }
}

impl Processor for SignatureOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, mut event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let signed = event.as_start_element().is_some_and(|s| self.is_signed(s, chain));
        if signed {
            if let XmlEvent::StartElement(start) = &mut event {
                let id = match start.id() {
                    Some(id) => id.to_string(),
                    None => {
                        let id = new_id("id");
                        start.set_attribute(ATT_WSU_ID, id.clone());
                        id
                    }
                };
                debug!(element = %start.name, id = %id, "Signing element");
                self.active.push(ActiveDigest {
                    id,
                    events: Vec::new(),
                    depth: 0,
                });
            }
        }

        let mut completed = Vec::new();
        for (position, active) in self.active.iter_mut().enumerate() {
            match &event {
                XmlEvent::StartElement(_) => active.depth += 1,
                XmlEvent::EndElement(_) => active.depth -= 1,
                _ => {}
            }
            active.events.push(event.clone());
            if active.depth == 0 {
                completed.push(position);
            }
        }
        for position in completed.into_iter().rev() {
            let active = self.active.remove(position);
            let digest_value = digest(&self.digest_algorithm, &canonicalize(&active.events)?)?;
            self.references.borrow_mut().push(SignedReference {
                id: active.id,
                digest_value,
            });
        }
        chain.output(event)
    }
}

enum SignatureKey {
    Rsa(RsaPrivateKey),
    /// Secret of a token registered in the security context
    Token(String),
}

/// Signs the collected references and inserts the signature into the
/// header at document end.
pub struct SignatureEndingOutputProcessor {
    id: String,
    method: String,
    digest_algorithm: String,
    key: SignatureKey,
    key_info: SecurityTokenReference,
    references: SharedReferences,
    buffer: HeaderBuffer,
}

impl SignatureEndingOutputProcessor {
    fn signed_info(&self) -> XmlElement {
        let algorithm = |name: QName, value: &str| {
            XmlElement::new(StartElement::new(name)).with_attribute(ATT_NULL_ALGORITHM, value)
        };
        let mut signed_info = XmlElement::declaring(TAG_DSIG_SIGNED_INFO)
            .with_child(algorithm(TAG_DSIG_CANONICALIZATION_METHOD, ALG_EXC_C14N))
            .with_child(algorithm(TAG_DSIG_SIGNATURE_METHOD, &self.method));
        for reference in self.references.borrow().iter() {
            signed_info.push_child(
                XmlElement::new(StartElement::new(TAG_DSIG_REFERENCE))
                    .with_attribute(ATT_NULL_URI, format!("#{}", reference.id))
                    .with_child(
                        XmlElement::new(StartElement::new(TAG_DSIG_TRANSFORMS))
                            .with_child(algorithm(TAG_DSIG_TRANSFORM, ALG_EXC_C14N)),
                    )
                    .with_child(algorithm(TAG_DSIG_DIGEST_METHOD, &self.digest_algorithm))
                    .with_child(
                        XmlElement::new(StartElement::new(TAG_DSIG_DIGEST_VALUE))
                            .with_text(base64_encode(&reference.digest_value)),
                    ),
            );
        }
        signed_info
    }

    fn signature(&self, chain: &mut ChainContext<'_>) -> WssResult<XmlElement> {
        if self.references.borrow().is_empty() {
            return Err(WssError::config("The message has no parts to sign"));
        }
        let signed_info = self.signed_info();
        let canonical = canonicalize_element(&signed_info)?;
        let value = match &self.key {
            SignatureKey::Rsa(private) => sign(&self.method, SigningKey::Rsa(private), &canonical)?,
            SignatureKey::Token(token_id) => {
                let secret = chain
                    .security_context()
                    .security_token(token_id)?
                    .secret_key(&self.method)?;
                sign(&self.method, SigningKey::Hmac(&secret), &canonical)?
            }
        };
        let value = base64_encode(&value);
        chain.security_context().push(keys::SIGNATURE_VALUES, value.clone());
        debug!(references = self.references.borrow().len(), algorithm = %self.method, "Message signed");

        Ok(XmlElement::declaring(TAG_DSIG_SIGNATURE)
            .with_attribute(ATT_NULL_ID, new_id("SIG"))
            .with_child(signed_info)
            .with_child(XmlElement::new(StartElement::new(TAG_DSIG_SIGNATURE_VALUE)).with_text(value))
            .with_child(XmlElement::new(StartElement::new(TAG_DSIG_KEY_INFO)).with_child(self.key_info.to_element())))
    }
}

impl Processor for SignatureEndingOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let Some(events) = self.buffer.push(event, chain)? else {
            return Ok(());
        };
        let signature = self.signature(chain)?;
        HeaderBuffer::flush(events, &[signature], chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ALG_SHA1;

    fn ending(references: Vec<SignedReference>) -> SignatureEndingOutputProcessor {
        SignatureEndingOutputProcessor {
            id: "signature-ending".into(),
            method: crate::constants::ALG_RSA_SHA1.into(),
            digest_algorithm: ALG_SHA1.into(),
            key: SignatureKey::Token("unused".into()),
            key_info: SecurityTokenReference::direct("#x", None),
            references: Rc::new(RefCell::new(references)),
            buffer: HeaderBuffer::default(),
        }
    }

    #[test]
    fn test_signed_info_lists_references_in_order() {
        let processor = ending(vec![
            SignedReference {
                id: "TS-1".into(),
                digest_value: vec![1, 2],
            },
            SignedReference {
                id: "id-2".into(),
                digest_value: vec![3],
            },
        ]);
        let signed_info = processor.signed_info();
        let uris: Vec<_> = signed_info
            .children_named(&TAG_DSIG_REFERENCE)
            .filter_map(|r| r.attribute(&ATT_NULL_URI))
            .collect();
        assert_eq!(uris, vec!["#TS-1", "#id-2"]);
        let first = signed_info.child(&TAG_DSIG_REFERENCE).unwrap();
        assert_eq!(first.child_text(&TAG_DSIG_DIGEST_VALUE).unwrap(), base64_encode(&[1, 2]));
        assert_eq!(
            first
                .child(&TAG_DSIG_TRANSFORMS)
                .and_then(|t| t.child(&TAG_DSIG_TRANSFORM))
                .and_then(|t| t.attribute(&ATT_NULL_ALGORITHM)),
            Some(ALG_EXC_C14N)
        );
    }
}
