//! End-to-end tests: messages secured by the outbound chain and processed
//! by the inbound chain.

mod common;

use common::{outbound_config, secure, verify, verify_with, CONTEXT_ISSUER, MESSAGE};
use std::cell::Cell;
use std::rc::Rc;
use zentinel_wssec::chain::{ChainContext, Phase, Processor, ProcessorChain};
use zentinel_wssec::config::{OutboundAction, SecurityConfig};
use zentinel_wssec::error::{ErrorCode, MASKED_FAILURE_MESSAGE};
use zentinel_wssec::event::TokenUsage;
use zentinel_wssec::token::{KeyMaterial, LazyTokenProvider, SecurityToken, StaticTokenProvider, TokenType};
use zentinel_wssec::xml::{QName, StartElement, XmlEvent};
use zentinel_wssec::{SecurityContext, SecurityEvent, WssError, WssResult};

fn signed_part(events: &[SecurityEvent], local: &str) -> Option<bool> {
    events.iter().find_map(|e| match e {
        SecurityEvent::SignedPart(part) if part.path.last().is_some_and(|n| n.local() == local) => Some(part.protected),
        _ => None,
    })
}

fn encrypted_part(events: &[SecurityEvent], local: &str) -> Option<bool> {
    events.iter().find_map(|e| match e {
        SecurityEvent::EncryptedPart(part) if part.path.last().is_some_and(|n| n.local() == local) => {
            Some(part.protected)
        }
        _ => None,
    })
}

/// Drop the last four characters of the `n`th CipherValue.
fn truncate_cipher_value(xml: &str, n: usize) -> String {
    let close = "</xenc:CipherValue>";
    let end = xml
        .match_indices(close)
        .nth(n)
        .map(|(i, _)| i)
        .expect("cipher value present");
    format!("{}{}", &xml[..end - 4], &xml[end..])
}

/// Swap the URIs of the two `xenc:DataReference`s.
fn swap_data_references(xml: &str) -> String {
    let marker = "<xenc:DataReference URI=\"";
    let uris: Vec<String> = xml
        .match_indices(marker)
        .map(|(i, _)| {
            let start = i + marker.len();
            let end = start + xml[start..].find('"').expect("closing quote");
            xml[start..end].to_string()
        })
        .collect();
    assert_eq!(uris.len(), 2);
    let uri = |u: &str| format!("URI=\"{}\"", u);
    xml.replacen(&uri(&uris[0]), &uri("swap"), 1)
        .replacen(&uri(&uris[1]), &uri(&uris[0]), 1)
        .replacen(&uri("swap"), &uri(&uris[1]), 1)
}

/// Byte range of the content of the EncryptedKey's `ds:KeyInfo`.
fn key_info_range(xml: &str) -> (usize, usize) {
    let encrypted_key = xml.find("<xenc:EncryptedKey").expect("encrypted key present");
    let key_info = encrypted_key + xml[encrypted_key..].find("<ds:KeyInfo").expect("key info present");
    let start = key_info + xml[key_info..].find('>').expect("key info start tag") + 1;
    let end = start + xml[start..].find("</ds:KeyInfo>").expect("key info end tag");
    (start, end)
}

fn replace_key_info(xml: &str, content: &str) -> String {
    let (start, end) = key_info_range(xml);
    format!("{}{}{}", &xml[..start], content, &xml[end..])
}

fn bsp_rules(err: &WssError) -> Vec<&'static str> {
    err.bsp_violations()
        .map(|v| v.rules.iter().map(|r| r.code()).collect())
        .unwrap_or_default()
}

// ============================================================================
// Signatures
// ============================================================================

#[test]
fn test_sign_and_verify() {
    let secured = secure(
        outbound_config(vec![OutboundAction::Timestamp, OutboundAction::Signature]),
        MESSAGE,
    )
    .unwrap();
    assert!(secured.contains("<ds:Signature"));
    assert!(secured.contains("<wsu:Timestamp"));

    let (xml, events) = verify(&secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
    assert_eq!(signed_part(&events, "Body"), Some(true));
    assert_eq!(signed_part(&events, "a"), Some(false));
    assert!(events.iter().any(|e| matches!(e, SecurityEvent::Timestamp { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SecurityEvent::Token(t) if t.kind == TokenType::X509V3 && t.usages.contains(&TokenUsage::MainSignature)
    )));
}

#[test]
fn test_signed_header_part() {
    let mut config = outbound_config(vec![OutboundAction::Signature]);
    config.outbound.signature_parts = vec!["{http://example.org}a".into()];
    let secured = secure(config, MESSAGE).unwrap();

    let (_, events) = verify(&secured).unwrap();
    assert_eq!(signed_part(&events, "a"), Some(true));
    assert_eq!(signed_part(&events, "Body"), Some(true));
}

#[test]
fn test_tampered_body_fails_signature() {
    let secured = secure(outbound_config(vec![OutboundAction::Signature]), MESSAGE).unwrap();
    let tampered = secured.replace("hello", "hullo");
    let err = verify(&tampered).unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedCheck);
    assert_eq!(err.message, MASKED_FAILURE_MESSAGE);
}

// ============================================================================
// Encryption
// ============================================================================

#[test]
fn test_encrypt_and_decrypt() {
    let secured = secure(outbound_config(vec![OutboundAction::Encrypt]), MESSAGE).unwrap();
    assert!(secured.contains("<xenc:EncryptedKey"));
    assert!(secured.contains("<xenc:EncryptedData"));
    assert!(!secured.contains("hello"));

    let (xml, events) = verify(&secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
    assert!(!xml.contains("EncryptedData"));
    assert_eq!(encrypted_part(&events, "Body"), Some(true));
    assert!(events.iter().any(|e| matches!(
        e,
        SecurityEvent::Operation { name } if name == &QName::new("http://example.org", "Echo")
    )));
}

#[test]
fn test_sign_then_encrypt() {
    let secured = secure(
        outbound_config(vec![OutboundAction::Signature, OutboundAction::Encrypt]),
        MESSAGE,
    )
    .unwrap();
    // The structure applied last comes first
    let encrypted_key = secured.find("<xenc:EncryptedKey").unwrap();
    let signature = secured.find("<ds:Signature").unwrap();
    assert!(encrypted_key < signature);

    let (xml, events) = verify(&secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
    assert_eq!(signed_part(&events, "Body"), Some(true));
    assert_eq!(encrypted_part(&events, "Body"), Some(true));
}

#[test]
fn test_encrypt_then_sign_covers_encrypted_data() {
    let secured = secure(
        outbound_config(vec![OutboundAction::Encrypt, OutboundAction::Signature]),
        MESSAGE,
    )
    .unwrap();

    let mut inbound = SecurityConfig::default();
    inbound.inbound.require_signed_encrypted_data_elements = true;
    let (xml, events) = verify_with(inbound, &secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
    assert_eq!(signed_part(&events, "Body"), Some(true));
    assert_eq!(encrypted_part(&events, "Body"), Some(true));
}

#[test]
fn test_unsigned_encrypted_data_rejected_when_required() {
    let secured = secure(outbound_config(vec![OutboundAction::Encrypt]), MESSAGE).unwrap();

    let mut inbound = SecurityConfig::default();
    inbound.inbound.require_signed_encrypted_data_elements = true;
    let err = verify_with(inbound, &secured).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);
    assert!(err.message.contains("is not covered by a signature"));
}

#[test]
fn test_masked_key_fits_first_ciphertext_met() {
    let mut config = outbound_config(vec![OutboundAction::Encrypt]);
    config.outbound.encryption_symmetric_algorithm = "http://www.w3.org/2001/04/xmlenc#aes256-cbc".into();
    config.outbound.encryption_parts = vec!["{http://example.org}a".into()];
    let secured = secure(config, MESSAGE).unwrap();

    // The header element is met first but is no longer listed first
    let reordered = swap_data_references(&secured);
    let (xml, _) = verify(&reordered).unwrap();
    assert!(xml.contains(">1</e:a>"));

    let err = verify(&truncate_cipher_value(&reordered, 0)).unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedCheck);
    assert_eq!(err.message, MASKED_FAILURE_MESSAGE);
}

#[test]
fn test_key_info_with_extra_child_violates_bsp() {
    let secured = secure(outbound_config(vec![OutboundAction::Encrypt]), MESSAGE).unwrap();
    let (start, end) = key_info_range(&secured);
    let reference = &secured[start..end];
    let extended = replace_key_info(&secured, &format!("{}<ds:KeyName>extra</ds:KeyName>", reference));

    let err = verify(&extended).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);
    assert_eq!(bsp_rules(&err), vec!["R5424"]);
}

#[test]
fn test_bare_x509_data_in_key_info() {
    let secured = secure(outbound_config(vec![OutboundAction::Encrypt]), MESSAGE).unwrap();
    let x509_data = concat!(
        "<ds:X509Data><ds:X509IssuerSerial>",
        "<ds:X509IssuerName>CN=Integration CA</ds:X509IssuerName>",
        "<ds:X509SerialNumber>2001</ds:X509SerialNumber>",
        "</ds:X509IssuerSerial></ds:X509Data>"
    );
    let rewritten = replace_key_info(&secured, x509_data);

    let err = verify(&rewritten).unwrap_err();
    assert_eq!(bsp_rules(&err), vec!["R5426"]);

    let mut lenient = SecurityConfig::default();
    lenient.bsp.ignored_rules = vec!["R5426".into()];
    let (xml, _) = verify_with(lenient, &rewritten).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
}

#[test]
fn test_rsa15_transport_needs_opt_in() {
    let mut config = outbound_config(vec![OutboundAction::Encrypt]);
    config.outbound.key_transport_algorithm = "http://www.w3.org/2001/04/xmlenc#rsa-1_5".into();
    let secured = secure(config, MESSAGE).unwrap();

    let err = verify(&secured).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);

    let mut inbound = SecurityConfig::default();
    inbound.inbound.allow_rsa15_key_transport = true;
    let (xml, _) = verify_with(inbound, &secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
}

#[test]
fn test_key_unwrap_and_data_failures_look_the_same() {
    let secured = secure(outbound_config(vec![OutboundAction::Encrypt]), MESSAGE).unwrap();

    // The first CipherValue belongs to the EncryptedKey in the header
    let bad_key = verify(&truncate_cipher_value(&secured, 0)).unwrap_err();
    let bad_data = verify(&truncate_cipher_value(&secured, 1)).unwrap_err();

    assert_eq!(bad_key.code, ErrorCode::FailedCheck);
    assert_eq!(bad_key.code, bad_data.code);
    assert_eq!(bad_key.message, bad_data.message);
    assert_eq!(bad_key.message, MASKED_FAILURE_MESSAGE);
}

// ============================================================================
// Tokens
// ============================================================================

#[test]
fn test_username_token_round_trip() {
    let secured = secure(
        outbound_config(vec![OutboundAction::UsernameToken, OutboundAction::Timestamp]),
        MESSAGE,
    )
    .unwrap();
    assert!(secured.contains("<wsse:UsernameToken"));
    assert!(!secured.contains(">secret<"));

    let (_, events) = verify(&secured).unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, SecurityEvent::Token(t) if t.kind == TokenType::UsernameToken)));
}

#[test]
fn test_security_context_with_derived_keys() {
    let secured = secure(
        outbound_config(vec![
            OutboundAction::SecurityContextToken,
            OutboundAction::SignatureWithDerivedKey,
            OutboundAction::EncryptWithDerivedKey,
        ]),
        MESSAGE,
    )
    .unwrap();
    let sct = secured.find("<wsc:SecurityContextToken").unwrap();
    let dkt = secured.find("<wsc:DerivedKeyToken").unwrap();
    assert!(sct < dkt);
    assert!(!secured.contains("hello"));

    let (xml, events) = verify(&secured).unwrap();
    assert!(xml.contains("<e:value>hello</e:value>"));
    assert_eq!(signed_part(&events, "Body"), Some(true));
    assert_eq!(encrypted_part(&events, "Body"), Some(true));

    let tokens: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SecurityEvent::Token(t) if t.kind == TokenType::SecurityContextToken => Some(t),
            _ => None,
        })
        .collect();
    assert!(!tokens.is_empty());
    assert!(tokens.iter().all(|t| t.derived));
    assert!(tokens.iter().all(|t| t.issuer_name.as_deref() == Some(CONTEXT_ISSUER)));
}

#[test]
fn test_derived_keys_need_a_context() {
    let err = secure(outbound_config(vec![OutboundAction::SignatureWithDerivedKey]), MESSAGE).unwrap_err();
    assert_eq!(err.code, ErrorCode::Failure);
}

#[test]
fn test_repeated_processing_is_independent() {
    let secured = secure(outbound_config(vec![OutboundAction::Signature]), MESSAGE).unwrap();
    let (first, first_events) = verify(&secured).unwrap();
    let (second, second_events) = verify(&secured).unwrap();
    assert_eq!(first, second);
    assert_eq!(first_events, second_events);
}

// ============================================================================
// Token registry
// ============================================================================

#[test]
fn test_lazy_provider_builds_token_once() {
    let builds = Rc::new(Cell::new(0));
    let counter = Rc::clone(&builds);
    let mut ctx = SecurityContext::new();
    ctx.register_security_token_provider(
        "tok-1",
        Rc::new(LazyTokenProvider::new("tok-1", move || {
            counter.set(counter.get() + 1);
            Ok(SecurityToken::new(
                "tok-1",
                TokenType::SharedSecret,
                KeyMaterial::Symmetric(vec![1; 16]),
            ))
        })),
    );

    let first = ctx.security_token("tok-1").unwrap();
    let second = ctx.security_token("tok-1").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(builds.get(), 1);

    let err = ctx.security_token("tok-2").unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityTokenUnavailable);
}

#[test]
fn test_second_registration_is_authoritative() {
    let mut ctx = SecurityContext::new();
    for key in [vec![1; 16], vec![2; 16]] {
        let token = SecurityToken::new("tok", TokenType::SharedSecret, KeyMaterial::Symmetric(key));
        ctx.register_security_token_provider("tok", Rc::new(StaticTokenProvider::new(token)));
    }

    let token = ctx.security_token("tok").unwrap();
    assert!(matches!(token.key_material(), KeyMaterial::Symmetric(key) if key == &vec![2; 16]));
    assert_eq!(ctx.provider_ids().filter(|id| *id == "tok").count(), 1);
}

// ============================================================================
// Processor ordering
// ============================================================================

struct Named {
    id: &'static str,
    before: Vec<String>,
}

impl Processor for Named {
    fn id(&self) -> &str {
        self.id
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn before(&self) -> Vec<String> {
        self.before.clone()
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        chain.output(event)
    }
}

#[test]
fn test_cyclic_ordering_is_rejected() {
    let properties = common::properties(SecurityConfig::default());
    let mut chain = ProcessorChain::new(properties, SecurityContext::new(), Vec::new());
    chain
        .add_processor(Box::new(Named {
            id: "first",
            before: vec!["second".into()],
        }))
        .unwrap();
    chain
        .add_processor(Box::new(Named {
            id: "second",
            before: vec!["first".into()],
        }))
        .unwrap();

    let err = chain
        .process_event(XmlEvent::start(StartElement::new(QName::local_only("x"))))
        .unwrap_err();
    assert!(err.message.contains("first"));
    assert!(err.message.contains("second"));
}

#[test]
fn test_repeated_action_is_rejected() {
    let err = secure(
        outbound_config(vec![OutboundAction::Timestamp, OutboundAction::Timestamp]),
        MESSAGE,
    )
    .unwrap_err();
    assert!(err.message.contains("already part of the chain"));
}
