//! Shared credentials and helpers for the integration tests.

#![allow(dead_code)]

use rsa::RsaPrivateKey;
use std::sync::{Arc, OnceLock};
use zentinel_wssec::config::{OutboundAction, SecurityConfig};
use zentinel_wssec::credentials::{Certificate, MemoryCredentialStore, MemoryPasswordCallback};
use zentinel_wssec::xml::{XmlEventSource, XmlReader, XmlWriter};
use zentinel_wssec::{InboundWSSec, OutboundWSSec, SecurityEvent, SecurityProperties, WssResult};

pub const CONTEXT_ID: &str = "urn:ctx:1";
pub const CONTEXT_ISSUER: &str = "xs:anyURI";

pub const MESSAGE: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:e="http://example.org"><soap:Header><e:a>1</e:a></soap:Header><soap:Body><e:Echo><e:value>hello</e:value></e:Echo></soap:Body></soap:Envelope>"#;

fn rsa_key(index: usize) -> RsaPrivateKey {
    static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        (0..2)
            .map(|_| RsaPrivateKey::new(&mut rng, 1024).expect("key generation"))
            .collect()
    })[index]
        .clone()
}

fn certificate(alias: &str, index: usize) -> Certificate {
    Certificate {
        encoded: format!("CN={}|integration", alias).into_bytes(),
        subject: format!("CN={}", alias),
        issuer: "CN=Integration CA".to_string(),
        serial: format!("{}", 2000 + index),
        subject_key_identifier: Some(format!("ski-{}", alias).into_bytes()),
        public_key: rsa_key(index).to_public_key(),
    }
}

/// alice signs; bob receives encrypted messages and guards his key with a
/// password.
pub fn store() -> MemoryCredentialStore {
    let mut store = MemoryCredentialStore::new();
    store.add("alice", certificate("alice", 0), Some(rsa_key(0)), None);
    store.add("bob", certificate("bob", 1), Some(rsa_key(1)), Some("bobpw".into()));
    store
}

pub fn callback() -> MemoryPasswordCallback {
    MemoryPasswordCallback::new()
        .with_password("bob", "bobpw")
        .with_password("alice", "secret")
        .with_secret(CONTEXT_ID, vec![7; 32], Some(CONTEXT_ISSUER.to_string()))
}

pub fn properties(config: SecurityConfig) -> SecurityProperties {
    SecurityProperties::new(config, Arc::new(store()), Arc::new(callback())).expect("valid properties")
}

/// Config applying `actions` with alice as signer and bob as recipient.
pub fn outbound_config(actions: Vec<OutboundAction>) -> SecurityConfig {
    let mut config = SecurityConfig::default();
    config.outbound.actions = actions;
    config.outbound.signature_user = Some("alice".into());
    config.outbound.encryption_user = Some("bob".into());
    config.outbound.username = Some("alice".into());
    config.outbound.security_context_token.identifier = Some(CONTEXT_ID.into());
    config
}

/// Secure `xml` with `config` and return the serialized message.
pub fn secure(config: SecurityConfig, xml: &str) -> WssResult<String> {
    let mut reader = XmlReader::from_str(xml)?;
    let mut chain = OutboundWSSec::new(properties(config)).process_out_message(XmlWriter::new(Vec::new()))?;
    while let Some(event) = reader.next_event()? {
        chain.process_event(event)?;
    }
    let bytes = chain.finish()?.into_inner();
    Ok(String::from_utf8(bytes).expect("utf-8 output"))
}

/// Inbound processing of `xml` with default inbound settings.
pub fn verify(xml: &str) -> WssResult<(String, Vec<SecurityEvent>)> {
    verify_with(SecurityConfig::default(), xml)
}

pub fn verify_with(config: SecurityConfig, xml: &str) -> WssResult<(String, Vec<SecurityEvent>)> {
    let mut stream = InboundWSSec::new(properties(config)).process_in_message(XmlReader::from_str(xml)?, None)?;
    let events = stream.read_all()?;
    let security_events = stream.security_events().to_vec();
    Ok((zentinel_wssec::xml::events_to_string(&events)?, security_events))
}
