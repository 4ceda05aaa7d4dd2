//! WS-Security agent.
//!
//! Verifies and decrypts SOAP requests, enforces the configured policy and
//! turns the outcome into an allow or block decision for the proxy.

use crate::config::FailAction;
use crate::constants::NS_SOAP12;
use crate::context::keys;
use crate::error::{soap_fault_response, SoapFaultVersion, WssError, WssResult};
use crate::event::{HttpsTokenEvent, SecurityEvent, SecurityEventListener};
use crate::inbound::{InboundOptions, InboundWSSec};
use crate::policy::{Policy, PolicyEnforcer};
use crate::properties::SecurityProperties;
use crate::xml::{events_to_string, QName, XmlReader};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Header mutation requested from the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOp {
    Set { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block {
        status: u16,
        body: Option<String>,
        headers: Option<HashMap<String, String>>,
    },
}

/// Outcome of one request.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub decision: Decision,
    /// Headers to set on the request forwarded upstream
    pub request_headers: Vec<HeaderOp>,
    /// The processed message, when security processing succeeded
    pub message: Option<ProcessedMessage>,
}

impl AgentResponse {
    pub fn default_allow() -> Self {
        Self {
            decision: Decision::Allow,
            request_headers: Vec::new(),
            message: None,
        }
    }

    pub fn block(status: u16, body: Option<String>) -> Self {
        Self {
            decision: Decision::Block {
                status,
                body,
                headers: None,
            },
            request_headers: Vec::new(),
            message: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.decision, Decision::Block { .. })
    }

    /// Value of a request header set by this response.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.iter().find_map(|op| match op {
            HeaderOp::Set { name: n, value } if n.eq_ignore_ascii_case(name) => Some(value.as_str()),
            _ => None,
        })
    }
}

/// A message after verification and decryption.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub operation: Option<QName>,
    pub user: Option<String>,
    pub events: Vec<SecurityEvent>,
    /// The decrypted document
    pub xml: String,
}

/// One request as seen by the agent.
#[derive(Debug, Clone, Default)]
pub struct SoapRequest {
    pub correlation_id: String,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
    /// TLS facts of the connection, when it was made over HTTPS
    pub https: Option<HttpsTokenEvent>,
}

impl SoapRequest {
    pub fn new(correlation_id: impl Into<String>, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            content_type: content_type.map(str::to_string),
            body: Some(body.into()),
            https: None,
        }
    }

    pub fn with_https(mut self, https: HttpsTokenEvent) -> Self {
        self.https = Some(https);
        self
    }
}

/// Counters reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentMetrics {
    pub requests_processed: u64,
    pub requests_blocked: u64,
}

/// WS-Security agent for Zentinel.
pub struct WsSecurityAgent {
    inbound: InboundWSSec,
    policy: Option<Policy>,
    operation_policies: HashMap<QName, Policy>,
    requests_processed: AtomicU64,
    requests_blocked: AtomicU64,
}

impl WsSecurityAgent {
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            inbound: InboundWSSec::new(properties),
            policy: None,
            operation_policies: HashMap::new(),
            requests_processed: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
        }
    }

    /// Enforce `policy` on every message.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Enforce `policy` on messages for `operation`. Without a default
    /// policy, other operations are checked against the empty policy.
    pub fn with_operation_policy(mut self, operation: QName, policy: Policy) -> Self {
        self.operation_policies.insert(operation, policy);
        self
    }

    pub fn properties(&self) -> &SecurityProperties {
        self.inbound.properties()
    }

    pub fn metrics(&self) -> AgentMetrics {
        AgentMetrics {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_blocked: self.requests_blocked.load(Ordering::Relaxed),
        }
    }

    /// Check if Content-Type is valid for SOAP.
    fn is_valid_content_type(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) => {
                let ct_lower = ct.to_lowercase();
                self.properties()
                    .config
                    .settings
                    .allowed_content_types
                    .iter()
                    .any(|allowed| ct_lower.contains(&allowed.to_lowercase()))
            }
            None => false,
        }
    }

    fn enforcer(&self) -> Option<PolicyEnforcer> {
        if self.policy.is_none() && self.operation_policies.is_empty() {
            return None;
        }
        let default = self.policy.clone().unwrap_or_else(Policy::empty);
        Some(
            self.operation_policies
                .iter()
                .fold(PolicyEnforcer::new(default), |enforcer, (operation, policy)| {
                    enforcer.with_operation_policy(operation.clone(), policy.clone())
                }),
        )
    }

    /// Verify and decrypt one message.
    pub fn process_message(&self, body: &[u8], https: Option<HttpsTokenEvent>) -> WssResult<ProcessedMessage> {
        let listener = self
            .enforcer()
            .map(|enforcer| Box::new(enforcer) as Box<dyn SecurityEventListener>);
        let options = InboundOptions {
            https_token: https,
            sent_signature_values: Vec::new(),
        };
        let mut stream = self
            .inbound
            .process_in_message_with(XmlReader::from_bytes(body)?, listener, options)?;
        let events = stream.read_all()?;
        let mut security = stream.into_security_context();
        let security_events = security.take_security_events();
        let operation = security_events.iter().find_map(|event| match event {
            SecurityEvent::Operation { name } => Some(name.clone()),
            _ => None,
        });
        Ok(ProcessedMessage {
            operation,
            user: security.get(keys::AUTHENTICATED_USER).cloned(),
            events: security_events,
            xml: events_to_string(&events)?,
        })
    }

    /// Process a SOAP request and return the appropriate response.
    pub fn process(&self, request: &SoapRequest) -> AgentResponse {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        let correlation_id = &request.correlation_id;
        let settings = &self.properties().config.settings;

        debug!(correlation_id = %correlation_id, "Processing SOAP request");

        let content_type = request.content_type.as_deref();
        if !self.is_valid_content_type(content_type) {
            debug!(
                correlation_id = %correlation_id,
                content_type = ?content_type,
                "Non-SOAP content type, passing through"
            );
            return AgentResponse::default_allow();
        }

        let body = match &request.body {
            Some(b) => b,
            None => {
                debug!(correlation_id = %correlation_id, "No body available, passing through");
                return AgentResponse::default_allow();
            }
        };
        let version = soap_version(body);

        if body.len() > settings.max_body_size {
            warn!(
                correlation_id = %correlation_id,
                body_size = body.len(),
                max_size = settings.max_body_size,
                "SOAP body too large"
            );
            let error = WssError::invalid_security(format!(
                "Request body size {} exceeds maximum {}",
                body.len(),
                settings.max_body_size
            ));
            return self.reject(correlation_id, &error, version, "Body too large");
        }

        match self.process_message(body, request.https.clone()) {
            Ok(message) => {
                debug!(
                    correlation_id = %correlation_id,
                    operation = ?message.operation.as_ref().map(ToString::to_string),
                    user = ?message.user,
                    "SOAP request passed security checks"
                );
                self.allow(message)
            }
            Err(error) => {
                warn!(
                    correlation_id = %correlation_id,
                    code = %error.code.as_str(),
                    message = %error.message,
                    "WS-Security processing failed"
                );
                self.reject(correlation_id, &error, version, "Security error")
            }
        }
    }

    fn allow(&self, message: ProcessedMessage) -> AgentResponse {
        let mut response = AgentResponse::default_allow();

        if let (Some(header_name), Some(user)) = (&self.properties().config.settings.identity_header, &message.user) {
            response.request_headers.push(HeaderOp::Set {
                name: header_name.clone(),
                value: user.clone(),
            });
        }

        response.request_headers.push(HeaderOp::Set {
            name: "X-SOAP-Validated".to_string(),
            value: "true".to_string(),
        });

        if let Some(op) = &message.operation {
            response.request_headers.push(HeaderOp::Set {
                name: "X-SOAP-Operation".to_string(),
                value: op.local().to_string(),
            });
        }

        response.message = Some(message);
        response
    }

    fn reject(
        &self,
        correlation_id: &str,
        error: &WssError,
        version: SoapFaultVersion,
        what: &str,
    ) -> AgentResponse {
        match self.properties().config.settings.fail_action {
            FailAction::Block => {
                self.requests_blocked.fetch_add(1, Ordering::Relaxed);
                build_block_response(error, version)
            }
            FailAction::Allow => {
                info!(
                    correlation_id = %correlation_id,
                    "{} but allowing request (fail_action=allow)",
                    what
                );
                AgentResponse::default_allow()
            }
        }
    }
}

/// Block response with a SOAP Fault body.
fn build_block_response(error: &WssError, version: SoapFaultVersion) -> AgentResponse {
    let fault_body = soap_fault_response(error, Some(version));
    let content_type = match version {
        SoapFaultVersion::Soap12 => "application/soap+xml; charset=utf-8",
        SoapFaultVersion::Soap11 => "text/xml; charset=utf-8",
    };
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());

    let mut response = AgentResponse::block(500, Some(fault_body.clone()));
    response.decision = Decision::Block {
        status: 500,
        body: Some(fault_body),
        headers: Some(headers),
    };
    response
}

/// Envelope namespace, sniffed without parsing so malformed bodies still
/// get a fault in their own version.
fn soap_version(body: &[u8]) -> SoapFaultVersion {
    let needle = NS_SOAP12.as_bytes();
    if body.windows(needle.len()).any(|w| w == needle) {
        SoapFaultVersion::Soap12
    } else {
        SoapFaultVersion::Soap11
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SecurityConfig, SettingsConfig};
    use crate::credentials::{test_keys, MemoryPasswordCallback};
    use crate::error::ErrorCode;
    use std::sync::Arc;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            settings: SettingsConfig {
                identity_header: Some("X-Authenticated-User".to_string()),
                ..SettingsConfig::default()
            },
            ..SecurityConfig::default()
        }
    }

    fn agent_with(config: SecurityConfig) -> WsSecurityAgent {
        let callback = MemoryPasswordCallback::new().with_password("alice", "secret");
        let properties =
            SecurityProperties::new(config, Arc::new(test_keys::store()), Arc::new(callback)).unwrap();
        WsSecurityAgent::new(properties)
    }

    fn agent() -> WsSecurityAgent {
        agent_with(test_config())
    }

    fn message(envelope_ns: &str, password: &str, timestamp: bool) -> Vec<u8> {
        let timestamp = if timestamp {
            let now = chrono::Utc::now();
            format!(
                r#"<wsu:Timestamp wsu:Id="TS-1"><wsu:Created>{}</wsu:Created><wsu:Expires>{}</wsu:Expires></wsu:Timestamp>"#,
                now.format("%Y-%m-%dT%H:%M:%SZ"),
                (now + chrono::Duration::minutes(5)).format("%Y-%m-%dT%H:%M:%SZ"),
            )
        } else {
            String::new()
        };
        format!(
            r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="{envelope_ns}">
  <soap:Header>
    <wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      {timestamp}
      <wsse:UsernameToken wsu:Id="UT-1">
        <wsse:Username>alice</wsse:Username>
        <wsse:Password>{password}</wsse:Password>
      </wsse:UsernameToken>
    </wsse:Security>
  </soap:Header>
  <soap:Body>
    <m:GetUser xmlns:m="http://example.org/users">
      <m:UserId>123</m:UserId>
    </m:GetUser>
  </soap:Body>
</soap:Envelope>"#
        )
        .into_bytes()
    }

    fn request(body: Vec<u8>) -> SoapRequest {
        SoapRequest::new("test-corr-123", Some("text/xml"), body)
    }

    fn fault_body(response: &AgentResponse) -> &str {
        match &response.decision {
            Decision::Block { body: Some(body), .. } => body,
            other => panic!("expected a block with a body, got {:?}", other),
        }
    }

    // --- Content type ---

    #[test]
    fn test_valid_content_type() {
        let agent = agent();
        assert!(agent.is_valid_content_type(Some("text/xml")));
        assert!(agent.is_valid_content_type(Some("application/soap+xml; charset=utf-8")));
        assert!(agent.is_valid_content_type(Some("TEXT/XML")));
        assert!(!agent.is_valid_content_type(Some("application/json")));
        assert!(!agent.is_valid_content_type(None));
    }

    #[test]
    fn test_non_soap_content_type_passes_through() {
        let agent = agent();
        let req = SoapRequest::new("c", Some("application/json"), b"{}".to_vec());
        let response = agent.process(&req);
        assert_eq!(response.decision, Decision::Allow);
        assert!(response.request_headers.is_empty());
    }

    #[test]
    fn test_no_body_passes_through() {
        let agent = agent();
        let req = SoapRequest {
            correlation_id: "c".into(),
            content_type: Some("text/xml".into()),
            ..SoapRequest::default()
        };
        assert_eq!(agent.process(&req).decision, Decision::Allow);
    }

    // --- Body size ---

    #[test]
    fn test_body_too_large_blocked() {
        let mut config = test_config();
        config.settings.max_body_size = 100;
        let agent = agent_with(config);
        let response = agent.process(&request(vec![b' '; 200]));
        assert!(response.is_blocked());
        assert!(fault_body(&response).contains("Request body size 200 exceeds maximum 100"));
    }

    #[test]
    fn test_body_too_large_allowed_when_fail_action_allow() {
        let mut config = test_config();
        config.settings.max_body_size = 100;
        config.settings.fail_action = FailAction::Allow;
        let agent = agent_with(config);
        let response = agent.process(&request(vec![b' '; 200]));
        assert_eq!(response.decision, Decision::Allow);
        assert_eq!(agent.metrics().requests_blocked, 0);
    }

    // --- Security processing ---

    #[test]
    fn test_authenticated_request_allowed() {
        let agent = agent();
        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "secret", true)));
        assert_eq!(response.decision, Decision::Allow);
        assert_eq!(response.request_header("X-SOAP-Validated"), Some("true"));
        assert_eq!(response.request_header("X-SOAP-Operation"), Some("GetUser"));
        assert_eq!(response.request_header("X-Authenticated-User"), Some("alice"));

        let message = response.message.unwrap();
        assert_eq!(message.operation, Some(QName::new("http://example.org/users", "GetUser")));
        assert!(message.xml.contains("GetUser"));
    }

    #[test]
    fn test_wrong_password_blocked() {
        let agent = agent();
        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "wrong", true)));
        assert!(response.is_blocked());
        let body = fault_body(&response);
        assert!(body.contains("wsse:FailedAuthentication"));
        assert!(!body.contains("secret"));
    }

    #[test]
    fn test_missing_security_header_blocked() {
        let agent = agent();
        let body = br#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body><m:Ping xmlns:m="urn:m"/></soap:Body>
</soap:Envelope>"#;
        let response = agent.process(&request(body.to_vec()));
        assert!(response.is_blocked());
        assert!(fault_body(&response).contains("Security header is missing"));
    }

    #[test]
    fn test_malformed_xml_blocked() {
        let agent = agent();
        let response = agent.process(&request(b"<soap:Envelope><unclosed>".to_vec()));
        assert!(response.is_blocked());
    }

    #[test]
    fn test_doctype_blocked() {
        let agent = agent();
        let body = br#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>&xxe;</soap:Body></soap:Envelope>"#;
        let response = agent.process(&request(body.to_vec()));
        assert!(response.is_blocked());
    }

    #[test]
    fn test_soap_12_block_response_content_type() {
        let agent = agent();
        let response = agent.process(&request(message(NS_SOAP12, "wrong", true)));
        match &response.decision {
            Decision::Block {
                status,
                body: Some(body),
                headers: Some(headers),
            } => {
                assert_eq!(*status, 500);
                assert!(body.contains(NS_SOAP12));
                assert_eq!(
                    headers.get("Content-Type").map(String::as_str),
                    Some("application/soap+xml; charset=utf-8")
                );
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_errors_with_allow_mode_pass_through() {
        let mut config = test_config();
        config.settings.fail_action = FailAction::Allow;
        let agent = agent_with(config);
        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "wrong", true)));
        assert_eq!(response.decision, Decision::Allow);
        assert!(response.request_header("X-SOAP-Validated").is_none());
    }

    // --- Policy ---

    #[test]
    fn test_policy_violation_blocked() {
        let agent = agent().with_policy(Policy::new(vec![crate::policy::Alternative::new(vec![
            crate::policy::Assertion::IncludeTimestamp,
        ])]));
        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "secret", false)));
        assert!(response.is_blocked());
        assert!(fault_body(&response).contains("Timestamp must be present"));

        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "secret", true)));
        assert_eq!(response.decision, Decision::Allow);
    }

    #[test]
    fn test_operation_policy_applies_only_to_its_operation() {
        let strict = Policy::new(vec![crate::policy::Alternative::new(vec![
            crate::policy::Assertion::IncludeTimestamp,
        ])]);
        let agent = agent().with_operation_policy(QName::new("http://example.org/users", "DeleteUser"), strict);
        let response = agent.process(&request(message(crate::constants::NS_SOAP11, "secret", false)));
        assert_eq!(response.decision, Decision::Allow);
    }

    #[test]
    fn test_policy_error_code() {
        let agent = agent().with_policy(Policy::new(Vec::new()));
        let err = agent
            .process_message(&message(crate::constants::NS_SOAP11, "secret", true), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSecurity);
        assert!(err.policy_violation().is_some());
    }

    // --- Metrics ---

    #[test]
    fn test_request_counters() {
        let agent = agent();
        assert_eq!(agent.metrics(), AgentMetrics::default());
        agent.process(&request(message(crate::constants::NS_SOAP11, "secret", true)));
        agent.process(&request(message(crate::constants::NS_SOAP11, "wrong", true)));
        let metrics = agent.metrics();
        assert_eq!(metrics.requests_processed, 2);
        assert_eq!(metrics.requests_blocked, 1);
    }
}
