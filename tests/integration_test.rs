//! Integration tests for the zentinel-wssec agent.
//!
//! Messages are secured with the outbound chain and handed to the agent the
//! way the proxy would, combining inbound processing, policy enforcement and
//! fault generation.

mod common;

use common::{outbound_config, properties, secure, MESSAGE};
use zentinel_wssec::agent::{Decision, SoapRequest};
use zentinel_wssec::config::{FailAction, OutboundAction, SecurityConfig};
use zentinel_wssec::event::{HttpsAuthentication, HttpsTokenEvent};
use zentinel_wssec::{Policy, QName, WsSecurityAgent};

const SP: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";
const WSP: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";

fn agent(config: SecurityConfig) -> WsSecurityAgent {
    WsSecurityAgent::new(properties(config))
}

fn request(body: &str) -> SoapRequest {
    SoapRequest::new("req-1", Some("text/xml; charset=utf-8"), body)
}

fn policy(assertions: &str) -> Policy {
    Policy::parse(&format!(
        r#"<wsp:Policy xmlns:wsp="{WSP}" xmlns:sp="{SP}">{assertions}</wsp:Policy>"#
    ))
    .unwrap()
}

fn fault_body(decision: &Decision) -> &str {
    match decision {
        Decision::Block { body, .. } => body.as_deref().unwrap_or_default(),
        Decision::Allow => panic!("expected a block"),
    }
}

// ============================================================================
// Secured requests that pass
// ============================================================================

#[test]
fn test_signed_and_encrypted_request_allowed() {
    let secured = secure(
        outbound_config(vec![
            OutboundAction::Timestamp,
            OutboundAction::Signature,
            OutboundAction::Encrypt,
        ]),
        MESSAGE,
    )
    .unwrap();

    let agent = agent(SecurityConfig::default()).with_policy(policy(
        "<sp:IncludeTimestamp/><sp:SignedParts><sp:Body/></sp:SignedParts><sp:EncryptedParts><sp:Body/></sp:EncryptedParts>",
    ));
    let response = agent.process(&request(&secured));

    assert!(!response.is_blocked());
    assert_eq!(response.request_header("X-SOAP-Validated"), Some("true"));
    assert_eq!(response.request_header("X-SOAP-Operation"), Some("Echo"));
    let message = response.message.unwrap();
    assert_eq!(message.operation, Some(QName::new("http://example.org", "Echo")));
    assert!(message.xml.contains("<e:value>hello</e:value>"));
}

#[test]
fn test_username_token_identity_forwarded() {
    let secured = secure(outbound_config(vec![OutboundAction::UsernameToken]), MESSAGE).unwrap();
    let mut config = SecurityConfig::default();
    config.settings.identity_header = Some("X-Authenticated-User".into());

    let response = agent(config).process(&request(&secured));
    assert!(!response.is_blocked());
    assert_eq!(response.request_header("X-Authenticated-User"), Some("alice"));
}

#[test]
fn test_https_token_satisfies_transport_binding() {
    let agent = agent(SecurityConfig::default()).with_policy(policy(
        "<sp:TransportBinding><wsp:Policy><sp:TransportToken><wsp:Policy><sp:HttpsToken/></wsp:Policy></sp:TransportToken></wsp:Policy></sp:TransportBinding>",
    ));
    let secured = secure(outbound_config(vec![OutboundAction::Timestamp]), MESSAGE).unwrap();
    let https = HttpsTokenEvent {
        authentication: HttpsAuthentication::None,
        issuer_name: None,
    };

    assert!(agent.process(&request(&secured)).is_blocked());
    assert!(!agent.process(&request(&secured).with_https(https)).is_blocked());
}

// ============================================================================
// Requests that are rejected
// ============================================================================

#[test]
fn test_unsigned_request_violates_policy() {
    let secured = secure(outbound_config(vec![OutboundAction::Timestamp]), MESSAGE).unwrap();
    let agent = agent(SecurityConfig::default()).with_policy(policy("<sp:SignedParts><sp:Body/></sp:SignedParts>"));

    let response = agent.process(&request(&secured));
    assert!(response.is_blocked());
    let fault = fault_body(&response.decision);
    assert!(fault.contains("wsse:InvalidSecurity"));
    assert!(fault.contains("Body must be signed"));
    assert_eq!(agent.metrics().requests_blocked, 1);
}

#[test]
fn test_operation_policy_only_applies_to_its_operation() {
    let secured = secure(outbound_config(vec![OutboundAction::Timestamp]), MESSAGE).unwrap();
    let strict = policy("<sp:SignedParts><sp:Body/></sp:SignedParts>");

    let other = agent(SecurityConfig::default())
        .with_operation_policy(QName::new("http://example.org", "Other"), strict.clone());
    assert!(!other.process(&request(&secured)).is_blocked());

    let echo = agent(SecurityConfig::default()).with_operation_policy(QName::new("http://example.org", "Echo"), strict);
    assert!(echo.process(&request(&secured)).is_blocked());
}

#[test]
fn test_tampered_request_gets_generic_fault() {
    let secured = secure(outbound_config(vec![OutboundAction::Signature]), MESSAGE).unwrap();
    let response = agent(SecurityConfig::default()).process(&request(&secured.replace("hello", "hullo")));

    let fault = fault_body(&response.decision);
    assert!(fault.contains("wsse:FailedCheck"));
    assert!(fault.contains("The signature or decryption was invalid"));
}

#[test]
fn test_fail_open_allows_rejected_request() {
    let mut config = SecurityConfig::default();
    config.settings.fail_action = FailAction::Allow;
    let agent = agent(config);

    let response = agent.process(&request(MESSAGE));
    assert!(!response.is_blocked());
    assert!(response.message.is_none());
    assert_eq!(agent.metrics().requests_processed, 1);
    assert_eq!(agent.metrics().requests_blocked, 0);
}
