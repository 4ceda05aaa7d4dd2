//! Per-alternative assertion state, driven by security events.

use super::model::{Alternative, Assertion, PartsAssertion, PasswordRequirement, ProtectionOrder, TokenAssertion, TokenRole};
use crate::constants::{is_body, is_header, NS_PASSWORD_DIGEST};
use crate::crypto::suite::AlgorithmSuite;
use crate::event::{AlgorithmSuiteEvent, AlgorithmUsage, HttpsTokenEvent, PartEvent, ProtectionAction, SecurityEvent, TokenEvent};
use crate::xml::QName;
use std::collections::HashSet;

/// When the alternative is checked for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// The security header has been processed and the operation is known
    Operation,
    /// The whole message has been processed
    Final,
}

/// One assertion and what the events so far established about it.
#[derive(Debug)]
struct AssertionState {
    assertion: Assertion,
    suite: Option<AlgorithmSuite>,
    asserted: bool,
    signed: bool,
    seen: HashSet<QName>,
    violation: Option<String>,
}

impl AssertionState {
    fn new(assertion: Assertion) -> Self {
        let mut state = Self {
            suite: None,
            asserted: false,
            signed: false,
            seen: HashSet::new(),
            violation: None,
            assertion,
        };
        if let Assertion::AlgorithmSuite(name) = &state.assertion {
            state.suite = AlgorithmSuite::named(name);
            if state.suite.is_none() {
                state.violation = Some(format!("AlgorithmSuite {} is not supported", name));
            }
        }
        state
    }

    fn violate(&mut self, message: String) {
        if self.violation.is_none() {
            self.violation = Some(message);
        }
    }

    fn register(&mut self, event: &SecurityEvent) {
        if self.violation.is_some() {
            return;
        }
        let result = match (&self.assertion, event) {
            (Assertion::Token { role: TokenRole::Transport, token }, SecurityEvent::HttpsToken(https)) => {
                check_https(token, https).map(|_| self.asserted = true)
            }
            (Assertion::Token { role, token }, SecurityEvent::Token(event))
                if event.usages.iter().any(|u| role.usages().contains(u)) =>
            {
                check_token(*role, token, event).map(|_| self.asserted = true)
            }
            (Assertion::Token { token, .. }, SecurityEvent::SignedElement(part)) => {
                if part.protected && part.path.last().is_some_and(|n| Some(n) == token.element().as_ref()) {
                    self.signed = true;
                }
                Ok(())
            }
            (Assertion::AlgorithmSuite(_), SecurityEvent::AlgorithmSuite(event)) => match &self.suite {
                Some(suite) => check_algorithm(suite, event),
                None => Ok(()),
            },
            (Assertion::SignedParts(parts), SecurityEvent::SignedPart(part)) => {
                check_part(parts, part, "signed").map(|body| self.asserted |= body)
            }
            (Assertion::EncryptedParts(parts), SecurityEvent::EncryptedPart(part)) => {
                check_part(parts, part, "encrypted").map(|body| self.asserted |= body)
            }
            (Assertion::RequiredParts(_), SecurityEvent::RequiredPart { path }) => {
                if let [_, header, element] = path.as_slice() {
                    if is_header(header) {
                        self.seen.insert(element.clone());
                    }
                }
                Ok(())
            }
            (Assertion::IncludeTimestamp, SecurityEvent::Timestamp { .. }) => {
                self.asserted = true;
                Ok(())
            }
            (Assertion::RequireSignatureConfirmation, SecurityEvent::SignatureConfirmation { .. }) => {
                self.asserted = true;
                Ok(())
            }
            (Assertion::ProtectionOrder(order), SecurityEvent::EncryptedPart(part)) if part.protected => {
                check_order(*order, part)
            }
            _ => Ok(()),
        };
        if let Err(message) = result {
            self.violate(message);
        }
    }

    /// Why the assertion does not hold at `stage`, if it does not.
    fn unmet(&self, stage: Stage) -> Option<String> {
        if let Some(violation) = &self.violation {
            return Some(violation.clone());
        }
        match &self.assertion {
            Assertion::Token { role, token } => {
                if !self.asserted {
                    return Some(format!("{} must be present as {}", token.name(), role));
                }
                if *role == TokenRole::SignedSupporting && token.element().is_some() && !self.signed {
                    return Some(format!("{} must be signed", token.name()));
                }
                None
            }
            Assertion::RequiredParts(names) => names
                .iter()
                .find(|name| !self.seen.contains(*name))
                .map(|name| format!("Element {} must be present", name)),
            Assertion::IncludeTimestamp if !self.asserted => Some("Timestamp must be present".to_string()),
            Assertion::RequireSignatureConfirmation if !self.asserted => {
                Some("SignatureConfirmation must be present".to_string())
            }
            Assertion::SignedParts(parts) if stage == Stage::Final && parts.body && !self.asserted => {
                Some("Body must be signed".to_string())
            }
            Assertion::EncryptedParts(parts) if stage == Stage::Final && parts.body && !self.asserted => {
                Some("Body must be encrypted".to_string())
            }
            Assertion::Unsupported(name) => Some(format!("Assertion {} is not supported", name)),
            _ => None,
        }
    }
}

fn check_issuer(expected: &Option<String>, actual: &Option<String>, token: &str) -> Result<(), String> {
    match expected {
        Some(expected) if actual.as_deref() != Some(expected.as_str()) => Err(format!(
            "IssuerName in Policy ({}) didn't match with the one in the {} ({})",
            expected,
            token,
            actual.as_deref().unwrap_or("none")
        )),
        _ => Ok(()),
    }
}

fn check_token(role: TokenRole, assertion: &TokenAssertion, event: &TokenEvent) -> Result<(), String> {
    if !assertion.accepts(event.kind) {
        return Err(format!(
            "{} requires a {} but a {} was used",
            role,
            assertion.name(),
            event.kind.as_str()
        ));
    }
    match assertion {
        TokenAssertion::SecurityContext {
            issuer_name,
            require_external_uri_reference,
            require_derived_keys,
        } => {
            check_issuer(issuer_name, &event.issuer_name, assertion.name())?;
            if *require_external_uri_reference && !event.external_uri_ref {
                return Err("SecurityContextToken must be referenced by an external URI".to_string());
            }
            if *require_derived_keys && !event.derived {
                return Err("SecurityContextToken must be used with derived keys".to_string());
            }
        }
        TokenAssertion::X509 {
            reference,
            require_derived_keys,
        } => {
            if let (Some(required), Some(used)) = (reference, event.key_identifier) {
                if *required != used {
                    return Err(format!("X509Token must be referenced by {:?} but {:?} was used", required, used));
                }
            }
            if *require_derived_keys && !event.derived {
                return Err("X509Token must be used with derived keys".to_string());
            }
        }
        TokenAssertion::Username { password } => match (password, event.password_type.as_deref()) {
            (PasswordRequirement::Hashed, Some(NS_PASSWORD_DIGEST)) | (PasswordRequirement::Any, _) => {}
            (PasswordRequirement::None, None) => {}
            (PasswordRequirement::Hashed, _) => return Err("UsernameToken does not contain a hashed password".to_string()),
            (PasswordRequirement::None, Some(_)) => return Err("UsernameToken must not contain a password".to_string()),
        },
        TokenAssertion::Https { .. } => {}
    }
    Ok(())
}

fn check_https(assertion: &TokenAssertion, event: &HttpsTokenEvent) -> Result<(), String> {
    let TokenAssertion::Https {
        authentication,
        issuer_name,
    } = assertion
    else {
        return Err(format!("TransportToken requires a {} but an HttpsToken was used", assertion.name()));
    };
    if let Some(required) = authentication {
        if *required != event.authentication {
            return Err(format!(
                "HttpsToken requires {:?} authentication but {:?} was used",
                required, event.authentication
            ));
        }
    }
    check_issuer(issuer_name, &event.issuer_name, "HttpsToken")
}

fn check_algorithm(suite: &AlgorithmSuite, event: &AlgorithmSuiteEvent) -> Result<(), String> {
    let result = match event.usage {
        AlgorithmUsage::Signature => suite.check_signature(&event.algorithm).and_then(|_| {
            match (event.algorithm == suite.asymmetric_signature, event.key_length) {
                (true, Some(bits)) => suite.check_asymmetric_key_length(bits),
                _ => Ok(()),
            }
        }),
        AlgorithmUsage::Digest => suite.check_digest(&event.algorithm),
        AlgorithmUsage::Canonicalization => suite.check_canonicalization(&event.algorithm),
        AlgorithmUsage::SymmetricEncryption => suite.check_symmetric_encryption(&event.algorithm),
        AlgorithmUsage::KeyWrap => suite.check_key_wrap(&event.algorithm).and_then(|_| match event.key_length {
            Some(bits) => suite.check_asymmetric_key_length(bits),
            None => Ok(()),
        }),
        AlgorithmUsage::KeyDerivation => Ok(()),
    };
    result.map_err(|e| e.message)
}

/// Whether the event protected the body.
fn check_part(parts: &PartsAssertion, part: &PartEvent, what: &str) -> Result<bool, String> {
    if !parts.covers(&part.path) {
        return Ok(false);
    }
    if !part.protected {
        return Err(format!("Element {} must be {}", part.path_string(), what));
    }
    Ok(matches!(part.path.as_slice(), [_, body] if is_body(body)))
}

fn check_order(order: ProtectionOrder, part: &PartEvent) -> Result<(), String> {
    let position = |action| part.protection_order.iter().position(|a| *a == action);
    let (Some(signature), Some(encryption)) = (position(ProtectionAction::Signature), position(ProtectionAction::Encryption)) else {
        return Ok(());
    };
    let signed_first = signature < encryption;
    match order {
        ProtectionOrder::SignBeforeEncrypting if !signed_first => Err(format!(
            "Policy enforces {} but {} was encrypted and then signed",
            order,
            part.path_string()
        )),
        ProtectionOrder::EncryptBeforeSigning if signed_first => Err(format!(
            "Policy enforces {} but {} was signed and then encrypted",
            order,
            part.path_string()
        )),
        _ => Ok(()),
    }
}

/// Live state of one policy alternative.
#[derive(Debug)]
pub(crate) struct AlternativeState {
    index: usize,
    assertions: Vec<AssertionState>,
    failed: bool,
}

impl AlternativeState {
    pub(crate) fn new(index: usize, alternative: &Alternative) -> Self {
        Self {
            index,
            assertions: alternative.assertions.iter().cloned().map(AssertionState::new).collect(),
            failed: false,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    /// Feed an event; returns false once the alternative can no longer hold.
    pub(crate) fn register(&mut self, event: &SecurityEvent) -> bool {
        if !self.failed {
            for assertion in &mut self.assertions {
                assertion.register(event);
            }
            self.failed = self.assertions.iter().any(|a| a.violation.is_some());
        }
        !self.failed
    }

    /// Check completeness at `stage`, failing the alternative if it is not.
    pub(crate) fn verify(&mut self, stage: Stage) -> bool {
        if !self.failed && self.unmet(stage).next().is_some() {
            self.failed = true;
        }
        !self.failed
    }

    /// Messages of the assertions that do not hold. Contradictions come
    /// first, then missing assertions in declaration order.
    pub(crate) fn unmet(&self, stage: Stage) -> impl Iterator<Item = String> + '_ {
        let violated = self.assertions.iter().filter_map(|a| a.violation.clone());
        let missing = self
            .assertions
            .iter()
            .filter(|a| a.violation.is_none())
            .filter_map(move |a| a.unmet(stage));
        violated.chain(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::soap11_body_path;
    use crate::token::TokenType;
    use crate::event::TokenUsage;

    fn sct(issuer: Option<&str>) -> Assertion {
        Assertion::Token {
            role: TokenRole::Signature,
            token: TokenAssertion::SecurityContext {
                issuer_name: issuer.map(str::to_string),
                require_external_uri_reference: false,
                require_derived_keys: false,
            },
        }
    }

    fn token_event(issuer: &str, usage: TokenUsage) -> SecurityEvent {
        let mut event = TokenEvent::new(TokenType::SecurityContextToken, "sct");
        event.usages.push(usage);
        event.issuer_name = Some(issuer.to_string());
        SecurityEvent::Token(event)
    }

    #[test]
    fn test_token_ignored_for_other_usage() {
        let mut state = AlternativeState::new(0, &Alternative::new(vec![sct(Some("urn:a"))]));
        assert!(state.register(&token_event("urn:b", TokenUsage::MainEncryption)));
        assert_eq!(
            state.unmet(Stage::Operation).next().unwrap(),
            "SecurityContextToken must be present as SignatureToken"
        );
        assert!(!state.register(&token_event("urn:b", TokenUsage::MainSignature)));
        assert_eq!(
            state.unmet(Stage::Operation).next().unwrap(),
            "IssuerName in Policy (urn:a) didn't match with the one in the SecurityContextToken (urn:b)"
        );
    }

    #[test]
    fn test_contradiction_reported_before_missing_token() {
        let encryption = Assertion::Token {
            role: TokenRole::Encryption,
            token: TokenAssertion::SecurityContext {
                issuer_name: Some("urn:a".into()),
                require_external_uri_reference: false,
                require_derived_keys: false,
            },
        };
        let mut state = AlternativeState::new(0, &Alternative::new(vec![encryption, sct(Some("urn:a"))]));
        assert!(!state.register(&token_event("urn:b", TokenUsage::MainSignature)));
        assert!(!state.register(&token_event("urn:b", TokenUsage::MainEncryption)));

        let unmet: Vec<_> = state.unmet(Stage::Operation).collect();
        assert_eq!(
            unmet,
            vec![
                "IssuerName in Policy (urn:a) didn't match with the one in the SecurityContextToken (urn:b)".to_string(),
                "SecurityContextToken must be present as EncryptionToken".to_string(),
            ]
        );
    }

    #[test]
    fn test_body_parts_checked_at_final_only() {
        let parts = PartsAssertion {
            body: true,
            ..Default::default()
        };
        let mut state = AlternativeState::new(0, &Alternative::new(vec![Assertion::SignedParts(parts)]));
        assert!(state.verify(Stage::Operation));
        assert!(state.register(&SecurityEvent::SignedPart(PartEvent::new(soap11_body_path(), true))));
        assert!(state.verify(Stage::Final));
    }

    #[test]
    fn test_unprotected_part_is_definite_violation() {
        let parts = PartsAssertion {
            body: true,
            ..Default::default()
        };
        let mut state = AlternativeState::new(0, &Alternative::new(vec![Assertion::EncryptedParts(parts)]));
        assert!(!state.register(&SecurityEvent::EncryptedPart(PartEvent::new(soap11_body_path(), false))));
        assert!(state.unmet(Stage::Final).next().unwrap().ends_with("Body must be encrypted"));
    }

    #[test]
    fn test_protection_order() {
        let mut part = PartEvent::new(soap11_body_path(), true);
        part.protection_order = vec![ProtectionAction::Encryption, ProtectionAction::Signature];
        assert!(check_order(ProtectionOrder::SignBeforeEncrypting, &part).is_err());
        assert!(check_order(ProtectionOrder::EncryptBeforeSigning, &part).is_ok());
    }
}
