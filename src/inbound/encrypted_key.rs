//! `xenc:EncryptedKey` and standalone `xenc:ReferenceList` handling.

use super::decrypt::DecryptProcessor;
use super::header::HeaderScope;
use crate::bsp::BspRule;
use crate::chain::ChainContext;
use crate::constants::{
    ALG_KEYTRANSPORT_RSA15, ALG_KEYTRANSPORT_RSAOAEP, ALG_KEYTRANSPORT_RSAOAEP_XENC11, ALG_SHA1,
    ATT_NULL_ALGORITHM, ATT_NULL_ENCODING, ATT_NULL_MIME_TYPE, ATT_NULL_RECIPIENT, ATT_NULL_TYPE, ATT_NULL_URI,
    TAG_DSIG_DIGEST_METHOD, TAG_DSIG_KEY_INFO, TAG_DSIG_X509_DATA, TAG_XENC11_MGF,
    TAG_XENC_CIPHER_DATA, TAG_XENC_CIPHER_VALUE, TAG_XENC_DATA_REFERENCE, TAG_XENC_ENCRYPTION_METHOD,
    TAG_XENC_REFERENCE_LIST,
};
use crate::context::keys;
use crate::crypto::{base64_decode, base64_encode, digest, unwrap_key, KeyTransport};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::event::{AlgorithmSuiteEvent, AlgorithmUsage, ProtectionAction, SecurityEvent, TokenEvent, TokenUsage};
use crate::token::{
    HasCertificateChain, HasKeyPair, KeyMaterial, MaskedKey, SecurityToken, SecurityTokenReference,
    StaticTokenProvider, TokenType,
};
use crate::xml::XmlElement;
use std::rc::Rc;
use tracing::debug;
use uuid::Uuid;

/// Ids named by the `xenc:DataReference` children of `list`.
fn data_references(list: &XmlElement) -> Vec<String> {
    list.children_named(&TAG_XENC_DATA_REFERENCE)
        .filter_map(|r| r.attribute(&ATT_NULL_URI))
        .map(|uri| uri.trim_start_matches('#').to_string())
        .collect()
}

fn reject_header_references(references: &[String], scope: &HeaderScope) -> WssResult<()> {
    for reference in references {
        if scope.header.find(&|e: &XmlElement| e.id() == Some(reference.as_str())).is_some() {
            return Err(WssError::invalid_security(format!(
                "Encrypted security header element {} is not supported",
                reference
            )));
        }
    }
    Ok(())
}

fn check_shape(element: &XmlElement, algorithm: &str, scope: &mut HeaderScope) -> WssResult<()> {
    let bsp = &mut scope.bsp;
    bsp.check(element.attribute(&ATT_NULL_TYPE).is_some(), BspRule::R3209);
    bsp.check(element.attribute(&ATT_NULL_MIME_TYPE).is_some(), BspRule::R5622);
    bsp.check(element.attribute(&ATT_NULL_ENCODING).is_some(), BspRule::R5623);
    bsp.check(element.attribute(&ATT_NULL_RECIPIENT).is_some(), BspRule::R5602);
    bsp.check(
        ![ALG_KEYTRANSPORT_RSA15, ALG_KEYTRANSPORT_RSAOAEP, ALG_KEYTRANSPORT_RSAOAEP_XENC11].contains(&algorithm),
        BspRule::R5621,
    );
    let children: Vec<&XmlElement> = element
        .child(&TAG_DSIG_KEY_INFO)
        .map(|k| k.elements().collect())
        .unwrap_or_default();
    bsp.check(children.len() != 1, BspRule::R5424);
    bsp.check(
        children.iter().any(|c| c.name() == &TAG_DSIG_X509_DATA),
        BspRule::R5426,
    );
    bsp.finish_structure()
}

/// Resolve the transported key and install decryption for its references.
pub(super) fn encrypted_key(
    element: &XmlElement,
    scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let method = element
        .child(&TAG_XENC_ENCRYPTION_METHOD)
        .ok_or_else(|| WssError::invalid_security("EncryptedKey has no EncryptionMethod"))?;
    let algorithm = method
        .attribute(&ATT_NULL_ALGORITHM)
        .ok_or_else(|| WssError::invalid_security("EncryptionMethod has no Algorithm"))?
        .to_string();
    check_shape(element, &algorithm, scope)?;

    let properties = chain.properties();
    let suite = properties.algorithm_suite.as_ref();
    let rsa15_allowed = properties.config.inbound.allow_rsa15_key_transport;
    if algorithm == ALG_KEYTRANSPORT_RSA15 && !rsa15_allowed && !suite.is_some_and(|s| s.allows_key_wrap(&algorithm)) {
        return Err(WssError::unsupported_algorithm(&algorithm)
            .wrap(ErrorCode::InvalidSecurity, "RSA-1.5 key transport is not allowed"));
    }

    let key_info = element.child(&TAG_DSIG_KEY_INFO).ok_or_else(|| {
        WssError::new(ErrorCode::SecurityTokenUnavailable, "EncryptedKey has no KeyInfo")
    })?;
    let resolved = SecurityTokenReference::from_key_info(key_info)?.resolve(chain.security_context(), properties)?;
    let recipient = resolved.token;
    let key_bits = recipient.certificates().first().map(|c| c.key_bits());

    if let Some(suite) = suite {
        if let Some(bits) = key_bits {
            suite.check_asymmetric_key_length(bits)?;
        }
        if !(algorithm == ALG_KEYTRANSPORT_RSA15 && rsa15_allowed) {
            suite.check_key_wrap(&algorithm)?;
        }
    }

    let private = recipient.private_key().ok_or_else(WssError::masked)?;
    let cipher_value = element
        .child(&TAG_XENC_CIPHER_DATA)
        .and_then(|c| c.child_text(&TAG_XENC_CIPHER_VALUE))
        .ok_or_else(|| WssError::invalid_security("EncryptedKey has no CipherValue"))?;
    let wrapped = base64_decode(&cipher_value)?;

    let references = element
        .child(&TAG_XENC_REFERENCE_LIST)
        .map(data_references)
        .unwrap_or_default();
    reject_header_references(&references, scope)?;

    let mut transport = KeyTransport::new(algorithm.clone());
    transport.digest = method
        .child(&TAG_DSIG_DIGEST_METHOD)
        .and_then(|d| d.attribute(&ATT_NULL_ALGORITHM))
        .map(str::to_string);
    transport.mgf = method
        .child(&TAG_XENC11_MGF)
        .and_then(|m| m.attribute(&ATT_NULL_ALGORITHM))
        .map(str::to_string);

    let key = match unwrap_key(&transport, &private, &wrapped) {
        Ok(key) => KeyMaterial::Symmetric(key),
        Err(e) if e.code == ErrorCode::UnsupportedAlgorithm => return Err(e),
        Err(_) => KeyMaterial::Masked(MaskedKey::new()),
    };

    let id = element
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("EncryptedKey-{}", Uuid::new_v4()));
    let token = SecurityToken::new(id.clone(), TokenType::EncryptedKey, key)
        .wrapping(&recipient)?
        .with_key_identifier(resolved.key_identifier)
        .with_encrypted_key_sha1(base64_encode(&digest(ALG_SHA1, &wrapped)?));
    let token = Rc::new(token);

    let mut token_event = TokenEvent::for_token(&recipient, TokenUsage::MainEncryption);
    token_event.key_identifier = Some(resolved.key_identifier);
    token_event.key_length = key_bits;

    let ctx = chain.security_context();
    ctx.register_security_token_provider(id.clone(), Rc::new(StaticTokenProvider::from_rc(Rc::clone(&token))));
    ctx.register_security_event(SecurityEvent::Token(token_event))?;
    ctx.register_security_event(SecurityEvent::AlgorithmSuite(AlgorithmSuiteEvent {
        algorithm,
        usage: AlgorithmUsage::KeyWrap,
        key_length: key_bits,
    }))?;

    debug!(id = %id, references = references.len(), "EncryptedKey processed");
    if !references.is_empty() {
        ctx.push(keys::PROTECTION_ORDER, ProtectionAction::Encryption);
        let processor = DecryptProcessor::new(scope.processor_id("decrypt"), references, Some(token));
        scope.pending.push(Box::new(processor));
    }
    Ok(())
}

/// A `ReferenceList` outside an `EncryptedKey`: each `EncryptedData` names
/// its own key.
pub(super) fn reference_list(
    element: &XmlElement,
    scope: &mut HeaderScope,
    chain: &mut ChainContext<'_>,
) -> WssResult<()> {
    let references = data_references(element);
    if references.is_empty() {
        return Ok(());
    }
    reject_header_references(&references, scope)?;
    chain
        .security_context()
        .push(keys::PROTECTION_ORDER, ProtectionAction::Encryption);
    let processor = DecryptProcessor::new(scope.processor_id("decrypt"), references, None);
    scope.pending.push(Box::new(processor));
    Ok(())
}
