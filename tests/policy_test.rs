//! Policy enforcement against security events, fed by hand or produced by
//! inbound processing.

mod common;

use proptest::prelude::*;
use zentinel_wssec::constants::{soap11_body_path, soap11_header_path};
use zentinel_wssec::error::{ErrorCode, ErrorSource};
use zentinel_wssec::event::{PartEvent, ProtectionAction, TokenEvent, TokenUsage};
use zentinel_wssec::token::TokenType;
use zentinel_wssec::{Policy, PolicyEnforcer, QName, SecurityConfig, SecurityEvent, WssResult};

const SP: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";
const WSP: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";

fn context_token_policy() -> Policy {
    let xml = format!(
        r#"<wsp:Policy xmlns:wsp="{WSP}" xmlns:sp="{SP}">
<sp:SymmetricBinding><wsp:Policy>
  <sp:ProtectionToken><wsp:Policy>
    <sp:SecurityContextToken>
      <sp:IssuerName>xs:anyURI</sp:IssuerName>
      <wsp:Policy><sp:RequireExternalUriReference/></wsp:Policy>
    </sp:SecurityContextToken>
  </wsp:Policy></sp:ProtectionToken>
</wsp:Policy></sp:SymmetricBinding>
<sp:SignedParts><sp:Body/></sp:SignedParts>
<sp:EncryptedParts><sp:Body/></sp:EncryptedParts>
</wsp:Policy>"#
    );
    Policy::parse(&xml).unwrap()
}

/// Separate signature and encryption tokens under a Basic256 suite.
fn split_token_policy() -> Policy {
    let token = r#"<wsp:Policy><sp:SecurityContextToken>
      <sp:IssuerName>xs:anyURI</sp:IssuerName>
      <wsp:Policy><sp:RequireExternalUriReference/></wsp:Policy>
    </sp:SecurityContextToken></wsp:Policy>"#;
    let xml = format!(
        r#"<sp:SymmetricBinding xmlns:wsp="{WSP}" xmlns:sp="{SP}"><wsp:Policy>
<sp:EncryptionToken>{token}</sp:EncryptionToken>
<sp:SignatureToken>{token}</sp:SignatureToken>
<sp:AlgorithmSuite><wsp:Policy><sp:Basic256/></wsp:Policy></sp:AlgorithmSuite>
</wsp:Policy></sp:SymmetricBinding>"#
    );
    Policy::parse(&xml).unwrap()
}

fn required_parts_policy(names: &[&str]) -> Policy {
    let headers: String = names
        .iter()
        .map(|n| format!(r#"<sp:Header Name="{}" Namespace="http://example.org"/>"#, n))
        .collect();
    Policy::parse(&format!(
        r#"<wsp:Policy xmlns:wsp="{WSP}" xmlns:sp="{SP}"><sp:RequiredParts>{headers}</sp:RequiredParts></wsp:Policy>"#
    ))
    .unwrap()
}

fn context_token(issuer: &str, usage: TokenUsage) -> SecurityEvent {
    let mut event = TokenEvent::new(TokenType::SecurityContextToken, "urn:ctx:1").with_usage(usage);
    event.issuer_name = Some(issuer.to_string());
    event.external_uri_ref = true;
    SecurityEvent::Token(event)
}

fn protected_body() -> PartEvent {
    let mut part = PartEvent::new(soap11_body_path(), true);
    part.protection_order = vec![ProtectionAction::Signature, ProtectionAction::Encryption];
    part
}

fn header(local: &str) -> SecurityEvent {
    let mut path = soap11_header_path();
    path.push(QName::new("http://example.org", local));
    SecurityEvent::required_part(path)
}

fn operation() -> SecurityEvent {
    SecurityEvent::operation(QName::new("http://example.org", "Echo"))
}

fn run(policy: Policy, events: &[SecurityEvent]) -> WssResult<()> {
    let mut enforcer = PolicyEnforcer::new(policy);
    for event in events {
        enforcer.register_security_event(event)?;
    }
    enforcer.do_final()
}

// ============================================================================
// Security context tokens
// ============================================================================

#[test]
fn test_context_token_policy_satisfied() {
    let events = vec![
        context_token("xs:anyURI", TokenUsage::MainSignature),
        context_token("xs:anyURI", TokenUsage::MainEncryption),
        operation(),
        SecurityEvent::SignedPart(protected_body()),
        SecurityEvent::EncryptedPart(protected_body()),
    ];
    run(context_token_policy(), &events).unwrap();
}

#[test]
fn test_context_token_issuer_mismatch() {
    let mut enforcer = PolicyEnforcer::new(context_token_policy());
    enforcer
        .register_security_event(&context_token("sss", TokenUsage::MainSignature))
        .unwrap();
    enforcer
        .register_security_event(&context_token("sss", TokenUsage::MainEncryption))
        .unwrap();

    let err = enforcer.register_security_event(&operation()).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);
    assert_eq!(
        err.policy_violation().unwrap().message,
        "IssuerName in Policy (xs:anyURI) didn't match with the one in the SecurityContextToken (sss)"
    );
}

#[test]
fn test_split_tokens_satisfied() {
    let events = vec![
        context_token("xs:anyURI", TokenUsage::MainSignature),
        context_token("xs:anyURI", TokenUsage::MainEncryption),
        SecurityEvent::SignedPart(protected_body()),
        SecurityEvent::EncryptedPart(protected_body()),
        SecurityEvent::operation(QName::local_only("definitions")),
    ];
    run(split_token_policy(), &events).unwrap();
}

#[test]
fn test_split_tokens_issuer_mismatch() {
    let mut enforcer = PolicyEnforcer::new(split_token_policy());
    for event in [
        context_token("sss", TokenUsage::MainSignature),
        context_token("sss", TokenUsage::MainEncryption),
        SecurityEvent::SignedPart(protected_body()),
        SecurityEvent::EncryptedPart(protected_body()),
    ] {
        enforcer.register_security_event(&event).unwrap();
    }

    let err = enforcer
        .register_security_event(&SecurityEvent::operation(QName::local_only("definitions")))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);
    assert_eq!(
        err.policy_violation().unwrap().message,
        "IssuerName in Policy (xs:anyURI) didn't match with the one in the SecurityContextToken (sss)"
    );
}

#[test]
fn test_unencrypted_body_violates_at_end() {
    let events = vec![
        context_token("xs:anyURI", TokenUsage::MainSignature),
        context_token("xs:anyURI", TokenUsage::MainEncryption),
        operation(),
        SecurityEvent::SignedPart(protected_body()),
    ];
    let err = run(context_token_policy(), &events).unwrap_err();
    assert_eq!(err.message, "Body must be encrypted");
}

// ============================================================================
// Required parts
// ============================================================================

#[test]
fn test_missing_required_header() {
    let mut enforcer = PolicyEnforcer::new(required_parts_policy(&["a"]));
    enforcer.register_security_event(&header("b")).unwrap();
    let err = enforcer.register_security_event(&operation()).unwrap_err();
    assert_eq!(
        err.policy_violation().unwrap().message,
        "Element {http://example.org}a must be present"
    );
}

#[test]
fn test_additional_headers_allowed() {
    run(required_parts_policy(&["a"]), &[header("a"), header("b"), operation()]).unwrap();
}

// ============================================================================
// Key transport
// ============================================================================

const RSA15_MESSAGE: &str = r##"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header><wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"><xenc:EncryptedKey xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Id="EK-1"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-1_5"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><wsse:SecurityTokenReference><wsse:Reference URI="#X509-unknown"/></wsse:SecurityTokenReference></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>AAAA</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></wsse:Security></soap:Header><soap:Body><e:Echo xmlns:e="http://example.org"/></soap:Body></soap:Envelope>"##;

#[test]
fn test_rsa15_key_transport_rejected_before_unwrap() {
    let err = common::verify(RSA15_MESSAGE).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSecurity);
    match &err.source {
        Some(ErrorSource::Nested(inner)) => assert_eq!(inner.code, ErrorCode::UnsupportedAlgorithm),
        other => panic!("unexpected source {:?}", other),
    }
}

#[test]
fn test_rsa15_allowed_by_opt_in_reaches_token_lookup() {
    let mut config = SecurityConfig::default();
    config.inbound.allow_rsa15_key_transport = true;
    let err = common::verify_with(config, RSA15_MESSAGE).unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityTokenUnavailable);
}

// ============================================================================
// Properties
// ============================================================================

fn verdict(required: &[&str], observed: &[&str]) -> Result<(), String> {
    let mut events: Vec<SecurityEvent> = observed.iter().map(|n| header(n)).collect();
    events.push(operation());
    run(required_parts_policy(required), &events).map_err(|e| e.message)
}

proptest! {
    /// Property: the order of independent header parts does not change the verdict
    #[test]
    fn proptest_required_parts_order_independent(
        observed in prop::sample::subsequence(vec!["a", "b", "c", "d"], 0..=4).prop_shuffle()
    ) {
        let mut sorted = observed.clone();
        sorted.sort();

        let shuffled = verdict(&["a", "b"], &observed);
        prop_assert_eq!(&shuffled, &verdict(&["a", "b"], &sorted));
        prop_assert_eq!(shuffled.is_ok(), observed.contains(&"a") && observed.contains(&"b"));
    }
}
