//! `ds:Signature` verification.
//!
//! `SignedInfo` is verified as soon as the header is handled. References to
//! header elements are digested from the buffered header; every other
//! reference is digested by a [`SignatureReferenceVerifyProcessor`] while the
//! rest of the message streams past.

use super::header::HeaderScope;
use crate::chain::{ChainContext, Processor};
use crate::constants::{
    ALG_EXC_C14N, ATT_NULL_ALGORITHM, ATT_NULL_URI, TAG_DSIG_CANONICALIZATION_METHOD, TAG_DSIG_DIGEST_METHOD,
    TAG_DSIG_DIGEST_VALUE, TAG_DSIG_KEY_INFO, TAG_DSIG_REFERENCE, TAG_DSIG_SIGNATURE_METHOD,
    TAG_DSIG_SIGNATURE_VALUE, TAG_DSIG_SIGNED_INFO, TAG_DSIG_TRANSFORM, TAG_DSIG_TRANSFORMS,
};
use crate::context::keys;
use crate::crypto::signature::is_hmac;
use crate::crypto::{base64_decode, base64_encode, digest, verify, VerifyingKey};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::event::{
    AlgorithmSuiteEvent, AlgorithmUsage, PartEvent, ProtectionAction, SecurityEvent, TokenEvent, TokenUsage,
};
use crate::token::{HasKeyPair, HasSymmetricKey, SecurityTokenReference};
use crate::xml::c14n::{canonicalize, canonicalize_element};
use crate::xml::{QName, XmlElement, XmlEvent};
use rsa::traits::PublicKeyParts;
use subtle::ConstantTimeEq;
use tracing::debug;

/// A `ds:Reference` whose target has not been digested yet.
#[derive(Debug, Clone)]
pub struct PendingReference {
    pub id: String,
    pub digest_algorithm: String,
    pub digest_value: Vec<u8>,
}

/// Details of a verified signature shared by its reference checks.
#[derive(Debug, Clone)]
struct SignatureSummary {
    token_id: String,
    protection_order: Vec<ProtectionAction>,
}

fn algorithm_of(element: &XmlElement, name: &QName) -> WssResult<String> {
    element
        .child(name)
        .and_then(|m| m.attribute(&ATT_NULL_ALGORITHM))
        .map(str::to_string)
        .ok_or_else(|| WssError::invalid_security(format!("{} has no Algorithm", name.local())))
}

fn parse_reference(reference: &XmlElement, chain: &ChainContext<'_>) -> WssResult<PendingReference> {
    let uri = reference.attribute(&ATT_NULL_URI).unwrap_or_default();
    let id = uri.strip_prefix('#').ok_or_else(|| {
        WssError::new(
            ErrorCode::FailedCheck,
            format!("Only same-document references are supported: '{}'", uri),
        )
    })?;
    if let Some(transforms) = reference.child(&TAG_DSIG_TRANSFORMS) {
        for transform in transforms.children_named(&TAG_DSIG_TRANSFORM) {
            let algorithm = transform.attribute(&ATT_NULL_ALGORITHM).unwrap_or_default();
            if algorithm != ALG_EXC_C14N {
                return Err(WssError::unsupported_algorithm(algorithm));
            }
        }
    }
    let digest_algorithm = algorithm_of(reference, &TAG_DSIG_DIGEST_METHOD)?;
    if let Some(suite) = &chain.properties().algorithm_suite {
        suite.check_digest(&digest_algorithm)?;
    }
    let digest_value = reference
        .child_text(&TAG_DSIG_DIGEST_VALUE)
        .ok_or_else(|| WssError::invalid_security("Reference has no DigestValue"))?;
    Ok(PendingReference {
        id: id.to_string(),
        digest_algorithm,
        digest_value: base64_decode(&digest_value)?,
    })
}

/// Path from `root` (exclusive) to the descendant with `id`.
fn path_to_id(root: &XmlElement, id: &str) -> Option<Vec<QName>> {
    for child in root.elements() {
        if child.id() == Some(id) {
            return Some(vec![child.name().clone()]);
        }
        if let Some(mut rest) = path_to_id(child, id) {
            rest.insert(0, child.name().clone());
            return Some(rest);
        }
    }
    None
}

fn check_digest(reference: &PendingReference, canonical: &[u8]) -> WssResult<()> {
    let computed = digest(&reference.digest_algorithm, canonical)?;
    if bool::from(computed.ct_eq(&reference.digest_value)) {
        Ok(())
    } else {
        debug!(id = %reference.id, "Digest mismatch");
        Err(WssError::masked())
    }
}

fn record_verified(
    reference: &PendingReference,
    path: Vec<QName>,
    summary: &SignatureSummary,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let mut part = PartEvent::new(path.clone(), true);
    part.token_id = Some(summary.token_id.clone());
    part.protection_order = summary.protection_order.clone();

    let ctx = chain.security_context();
    ctx.push(keys::SIGNED_PATHS, path);
    ctx.register_security_event(SecurityEvent::SignedElement(part))
}

/// Verify `SignedInfo` and register its references.
pub(super) fn signature(element: &XmlElement, scope: &mut HeaderScope, chain: &mut ChainContext<'_>) -> WssResult<()> {
    let signed_info = element
        .child(&TAG_DSIG_SIGNED_INFO)
        .ok_or_else(|| WssError::invalid_security("Signature has no SignedInfo"))?;
    let canonicalization = algorithm_of(signed_info, &TAG_DSIG_CANONICALIZATION_METHOD)?;
    if canonicalization != ALG_EXC_C14N {
        return Err(WssError::unsupported_algorithm(&canonicalization));
    }
    let method = algorithm_of(signed_info, &TAG_DSIG_SIGNATURE_METHOD)?;
    let properties = chain.properties();
    let suite = properties.algorithm_suite.as_ref();
    if let Some(suite) = suite {
        suite.check_canonicalization(&canonicalization)?;
        suite.check_signature(&method)?;
    }
    let signature_value = element
        .child_text(&TAG_DSIG_SIGNATURE_VALUE)
        .ok_or_else(|| WssError::invalid_security("Signature has no SignatureValue"))?;
    let signature_value = base64_decode(&signature_value)?;

    let key_info = element
        .child(&TAG_DSIG_KEY_INFO)
        .ok_or_else(|| WssError::new(ErrorCode::SecurityTokenUnavailable, "Signature has no KeyInfo"))?;
    let resolved = SecurityTokenReference::from_key_info(key_info)?.resolve(chain.security_context(), properties)?;
    let token = resolved.token;

    let canonical = canonicalize_element(signed_info)?;
    let key_length = if is_hmac(&method) {
        let secret = token.secret_key(&method)?;
        verify(&method, VerifyingKey::Hmac(&secret), &canonical, &signature_value)?;
        secret.len() * 8
    } else {
        let public = token.public_key().ok_or_else(|| {
            WssError::new(
                ErrorCode::SecurityTokenUnavailable,
                format!("Token {} has no public key", token.id()),
            )
        })?;
        let bits = public.size() * 8;
        if let Some(suite) = suite {
            suite.check_asymmetric_key_length(bits)?;
        }
        verify(&method, VerifyingKey::Rsa(&public), &canonical, &signature_value)?;
        bits
    };
    debug!(token = %token.id(), algorithm = %method, "Signature verified");

    let mut token_event = TokenEvent::for_token(&token, TokenUsage::MainSignature);
    token_event.key_identifier = Some(resolved.key_identifier);
    token_event.key_length = Some(key_length);
    let token_id = token_event.token_id.clone();

    let ctx = chain.security_context();
    ctx.register_security_event(SecurityEvent::Token(token_event))?;
    ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
        algorithm: method,
        usage: AlgorithmUsage::Signature,
        key_length: Some(key_length),
    }))?;
    ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
        algorithm: canonicalization,
        usage: AlgorithmUsage::Canonicalization,
        key_length: None,
    }))?;
    ctx.push(keys::SIGNATURE_VALUES, base64_encode(&signature_value));
    ctx.push(keys::PROTECTION_ORDER, ProtectionAction::Signature);
    let summary = SignatureSummary {
        token_id,
        protection_order: ctx.list(keys::PROTECTION_ORDER).to_vec(),
    };

    let mut streamed = Vec::new();
    for reference in signed_info.children_named(&TAG_DSIG_REFERENCE) {
        let reference = parse_reference(reference, chain)?;
        let ctx = chain.security_context();
        ctx.push(keys::SIGNED_REFERENCE_IDS, reference.id.clone());
        ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
                algorithm: reference.digest_algorithm.clone(),
                usage: AlgorithmUsage::Digest,
                key_length: None,
            }))?;

        let target = scope
            .header
            .find(&|e: &XmlElement| e.id() == Some(reference.id.as_str()));
        match (target, path_to_id(&scope.header, &reference.id)) {
            (Some(target), Some(relative)) => {
                check_digest(&reference, &canonicalize_element(target)?)?;
                let mut path = scope.header_path.clone();
                path.extend(relative);
                record_verified(&reference, path, &summary, chain)?;
            }
            _ => streamed.push(reference),
        }
    }

    if !streamed.is_empty() {
        let processor = SignatureReferenceVerifyProcessor::new(scope.processor_id("signature-reference"), streamed, summary);
        scope.pending.push(Box::new(processor));
    }
    Ok(())
}

struct ActiveReference {
    index: usize,
    events: Vec<XmlEvent>,
    depth: usize,
    path: Vec<QName>,
}

/// Digests referenced elements of the message body as they stream past.
pub struct SignatureReferenceVerifyProcessor {
    id: String,
    references: Vec<PendingReference>,
    verified: Vec<bool>,
    active: Vec<ActiveReference>,
    summary: SignatureSummary,
}

impl SignatureReferenceVerifyProcessor {
    fn new(id: String, references: Vec<PendingReference>, summary: SignatureSummary) -> Self {
        let verified = vec![false; references.len()];
        Self {
            id,
            references,
            verified,
            active: Vec::new(),
            summary,
        }
    }

    fn start_reference(&mut self, event: &XmlEvent, chain: &ChainContext<'_>) {
        let Some(id) = event.as_start_element().and_then(|s| s.id()) else {
            return;
        };
        let index = self
            .references
            .iter()
            .enumerate()
            .position(|(i, r)| r.id == id && !self.verified[i] && !self.active.iter().any(|a| a.index == i));
        if let Some(index) = index {
            self.active.push(ActiveReference {
                index,
                events: Vec::new(),
                depth: 0,
                path: chain.document().path().to_vec(),
            });
        }
    }
}

impl Processor for SignatureReferenceVerifyProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        self.start_reference(&event, chain);

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
            let reference = &self.references[active.index];
            check_digest(reference, &canonicalize(&active.events)?)?;
            self.verified[active.index] = true;
            record_verified(reference, active.path, &self.summary, chain)?;
        }

        if matches!(event, XmlEvent::EndDocument) {
            if let Some(i) = self.verified.iter().position(|v| !v) {
                return Err(WssError::invalid_security(format!(
                    "Signed element {} was not found",
                    self.references[i].id
                )));
            }
        }
        chain.output(event)
    }
}
