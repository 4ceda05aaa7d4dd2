//! WS-Policy normalization and WS-SecurityPolicy assertion parsing.
//!
//! `wsp:Policy` and `wsp:All` combine their children as a cross product,
//! `wsp:ExactlyOne` as a union. An assertion with a nested policy of k
//! alternatives becomes k alternatives of the assertion, and
//! `wsp:Optional="true"` adds the alternative without it. Bindings are then
//! flattened into the typed assertions the enforcer evaluates.

use super::model::{
    Alternative, Assertion, HeaderPart, PartsAssertion, PasswordRequirement, Policy, ProtectionOrder, TokenAssertion,
    TokenRole,
};
use crate::constants::{NS_SP_11, NS_SP_12, NS_SP_13, NS_WSP_15, NS_WSP_2004};
use crate::error::{WssError, WssResult};
use crate::event::HttpsAuthentication;
use crate::token::KeyIdentifierType;
use crate::xml::{QName, XmlElement, XmlEvent, XmlReader};
use tracing::debug;

/// Upper bound on normalized alternatives.
const MAX_ALTERNATIVES: usize = 1024;

/// Assertions that constrain only how a message is built, not what a
/// receiver can observe.
const BEHAVIOR_ASSERTIONS: &[&str] = &[
    "Layout",
    "OnlySignEntireHeadersAndBody",
    "EncryptSignature",
    "ProtectTokens",
    "Wss10",
    "Trust10",
    "Trust13",
    "MustSupportRefKeyIdentifier",
    "MustSupportRefIssuerSerial",
    "MustSupportRefThumbprint",
    "MustSupportRefEncryptedKey",
    "MustSupportRefExternalURI",
    "MustSupportRefEmbeddedToken",
];

impl Policy {
    /// Parse a policy document. The root is a `wsp:Policy` or a single
    /// assertion.
    pub fn parse(xml: &str) -> WssResult<Self> {
        let events: Vec<XmlEvent> = XmlReader::from_str(xml)?
            .read_all()?
            .into_iter()
            .filter(|e| !matches!(e, XmlEvent::StartDocument | XmlEvent::EndDocument))
            .collect();
        Self::from_element(&XmlElement::from_events(&events)?)
    }

    pub fn from_element(root: &XmlElement) -> WssResult<Self> {
        let alternatives = normalize(root)?
            .iter()
            .map(|alternative| Alternative::new(compile(alternative)))
            .collect::<Vec<_>>();
        debug!(alternatives = alternatives.len(), "Policy normalized");
        Ok(Policy::new(alternatives))
    }
}

fn is_wsp(name: &QName, local: &str) -> bool {
    name.local() == local && (name.namespace() == NS_WSP_2004 || name.namespace() == NS_WSP_15)
}

fn is_sp(name: &QName) -> bool {
    matches!(name.namespace(), NS_SP_11 | NS_SP_12 | NS_SP_13)
}

/// An assertion with one alternative of its nested policy chosen.
#[derive(Debug, Clone)]
struct NormalAssertion<'a> {
    element: &'a XmlElement,
    nested: Vec<NormalAssertion<'a>>,
}

impl<'a> NormalAssertion<'a> {
    fn local(&self) -> &str {
        self.element.name().local()
    }

    fn has_nested(&self, local: &str) -> bool {
        self.nested.iter().any(|n| n.local() == local)
    }

    /// Text of a direct child element, in any namespace.
    fn child_text(&self, local: &str) -> Option<String> {
        self.element.child_local(local).map(XmlElement::text)
    }
}

type NormalAlternative<'a> = Vec<NormalAssertion<'a>>;

fn normalize(element: &XmlElement) -> WssResult<Vec<NormalAlternative<'_>>> {
    let name = element.name();
    if is_wsp(name, "Policy") || is_wsp(name, "All") {
        let mut product: Vec<NormalAlternative<'_>> = vec![Vec::new()];
        for child in element.elements() {
            let alternatives = normalize(child)?;
            if product.len() * alternatives.len() > MAX_ALTERNATIVES {
                return Err(WssError::config("The policy has too many alternatives"));
            }
            product = product
                .iter()
                .flat_map(|left| {
                    alternatives.iter().map(move |right| {
                        let mut combined = left.clone();
                        combined.extend(right.iter().cloned());
                        combined
                    })
                })
                .collect();
        }
        return Ok(product);
    }
    if is_wsp(name, "ExactlyOne") {
        let mut union = Vec::new();
        for child in element.elements() {
            union.extend(normalize(child)?);
            if union.len() > MAX_ALTERNATIVES {
                return Err(WssError::config("The policy has too many alternatives"));
            }
        }
        return Ok(union);
    }
    if is_wsp(name, "PolicyReference") {
        return Err(WssError::config("Policy references are not supported"));
    }

    let nested = match element.elements().find(|c| is_wsp(c.name(), "Policy")) {
        Some(policy) => normalize(policy)?,
        None => vec![Vec::new()],
    };
    let mut alternatives: Vec<NormalAlternative<'_>> = nested
        .into_iter()
        .map(|nested| vec![NormalAssertion { element, nested }])
        .collect();
    let optional = element
        .start
        .attributes
        .iter()
        .any(|a| is_wsp(&a.name, "Optional") && a.value == "true");
    if optional {
        alternatives.push(Vec::new());
    }
    Ok(alternatives)
}

fn compile(alternative: &[NormalAssertion<'_>]) -> Vec<Assertion> {
    let mut assertions = Vec::new();
    for assertion in alternative {
        compile_assertion(assertion, &mut assertions);
    }
    assertions
}

fn compile_assertion(assertion: &NormalAssertion<'_>, out: &mut Vec<Assertion>) {
    let name = assertion.element.name();
    if !is_sp(name) {
        out.push(Assertion::Unsupported(name.clone()));
        return;
    }
    let local = assertion.local();
    if let Some(role) = TokenRole::from_local(local) {
        compile_tokens(role, assertion, out);
        return;
    }
    match local {
        "SymmetricBinding" | "AsymmetricBinding" => {
            let order = if assertion.has_nested("EncryptBeforeSigning") {
                ProtectionOrder::EncryptBeforeSigning
            } else {
                ProtectionOrder::SignBeforeEncrypting
            };
            out.push(Assertion::ProtectionOrder(order));
            for nested in &assertion.nested {
                compile_assertion(nested, out);
            }
        }
        "TransportBinding" => {
            for nested in &assertion.nested {
                compile_assertion(nested, out);
            }
        }
        "Wss11" => {
            if assertion.has_nested("RequireSignatureConfirmation") {
                out.push(Assertion::RequireSignatureConfirmation);
            }
        }
        "AlgorithmSuite" => match assertion.nested.first() {
            Some(suite) => out.push(Assertion::AlgorithmSuite(suite.local().to_string())),
            None => out.push(Assertion::Unsupported(name.clone())),
        },
        "IncludeTimestamp" => out.push(Assertion::IncludeTimestamp),
        // Handled by the enclosing binding
        "EncryptBeforeSigning" | "SignBeforeEncrypting" => {}
        "SignedParts" => out.push(Assertion::SignedParts(parts(assertion.element))),
        "EncryptedParts" => out.push(Assertion::EncryptedParts(parts(assertion.element))),
        "RequiredParts" => out.push(Assertion::RequiredParts(
            assertion
                .element
                .elements()
                .filter(|h| h.name().local() == "Header")
                .map(|h| {
                    QName::new(
                        h.attribute(&QName::local_only("Namespace")).unwrap_or_default(),
                        h.attribute(&QName::local_only("Name")).unwrap_or_default(),
                    )
                })
                .collect(),
        )),
        _ if BEHAVIOR_ASSERTIONS.contains(&local) => {
            debug!(assertion = %name, "Ignoring assertion without observable effect");
        }
        _ => out.push(Assertion::Unsupported(name.clone())),
    }
}

/// Token assertions under a role element. Supporting token elements may
/// also carry parts and suites, which apply as if they stood alone.
fn compile_tokens(role: TokenRole, assertion: &NormalAssertion<'_>, out: &mut Vec<Assertion>) {
    let mut found = false;
    for nested in &assertion.nested {
        match token(nested) {
            Some(token) => {
                found = true;
                out.push(Assertion::Token { role, token });
            }
            None if matches!(role, TokenRole::Supporting | TokenRole::SignedSupporting) => {
                compile_assertion(nested, out);
            }
            None => out.push(Assertion::Unsupported(nested.element.name().clone())),
        }
    }
    if !found {
        out.push(Assertion::Unsupported(assertion.element.name().clone()));
    }
}

fn token(assertion: &NormalAssertion<'_>) -> Option<TokenAssertion> {
    if !is_sp(assertion.element.name()) {
        return None;
    }
    let derived = assertion.has_nested("RequireDerivedKeys");
    Some(match assertion.local() {
        "SecurityContextToken" => TokenAssertion::SecurityContext {
            issuer_name: assertion.child_text("IssuerName"),
            require_external_uri_reference: assertion.has_nested("RequireExternalUriReference"),
            require_derived_keys: derived,
        },
        "X509Token" => {
            let reference = [
                ("RequireIssuerSerialReference", KeyIdentifierType::IssuerSerial),
                ("RequireThumbprintReference", KeyIdentifierType::ThumbprintIdentifier),
                ("RequireKeyIdentifierReference", KeyIdentifierType::SkiKeyIdentifier),
                ("RequireEmbeddedTokenReference", KeyIdentifierType::EmbeddedToken),
            ]
            .into_iter()
            .find(|(local, _)| assertion.has_nested(local))
            .map(|(_, kind)| kind);
            TokenAssertion::X509 {
                reference,
                require_derived_keys: derived,
            }
        }
        "UsernameToken" => TokenAssertion::Username {
            password: if assertion.has_nested("HashPassword") {
                PasswordRequirement::Hashed
            } else if assertion.has_nested("NoPassword") {
                PasswordRequirement::None
            } else {
                PasswordRequirement::Any
            },
        },
        "HttpsToken" => TokenAssertion::Https {
            authentication: if assertion.has_nested("RequireClientCertificate") {
                Some(HttpsAuthentication::ClientCertificate)
            } else if assertion.has_nested("HttpBasicAuthentication") {
                Some(HttpsAuthentication::Basic)
            } else if assertion.has_nested("HttpDigestAuthentication") {
                Some(HttpsAuthentication::Digest)
            } else {
                None
            },
            issuer_name: assertion.child_text("IssuerName"),
        },
        _ => return None,
    })
}

/// Body, Header children of a parts assertion. An empty assertion covers
/// the body and every header.
fn parts(element: &XmlElement) -> PartsAssertion {
    let mut parts = PartsAssertion::default();
    let mut any = false;
    for child in element.elements() {
        match child.name().local() {
            "Body" => {
                parts.body = true;
                any = true;
            }
            "Header" => {
                any = true;
                parts.headers.push(HeaderPart {
                    namespace: child
                        .attribute(&QName::local_only("Namespace"))
                        .unwrap_or_default()
                        .to_string(),
                    name: child.attribute(&QName::local_only("Name")).map(str::to_string),
                });
            }
            _ => {}
        }
    }
    if !any {
        parts.body = true;
        parts.all_headers = true;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SP: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";
    const WSP: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";

    #[test]
    fn test_exactly_one_yields_alternatives() {
        let xml = format!(
            r#"<wsp:Policy xmlns:wsp="{WSP}" xmlns:sp="{SP}"><wsp:ExactlyOne>
<wsp:All><sp:IncludeTimestamp/></wsp:All>
<wsp:All><sp:Wss11><wsp:Policy><sp:RequireSignatureConfirmation/></wsp:Policy></sp:Wss11></wsp:All>
</wsp:ExactlyOne></wsp:Policy>"#
        );
        let policy = Policy::parse(&xml).unwrap();
        assert_eq!(policy.alternatives().len(), 2);
        assert_eq!(policy.alternatives()[0].assertions, vec![Assertion::IncludeTimestamp]);
        assert_eq!(
            policy.alternatives()[1].assertions,
            vec![Assertion::RequireSignatureConfirmation]
        );
    }

    #[test]
    fn test_optional_assertion_adds_empty_alternative() {
        let xml = format!(r#"<sp:IncludeTimestamp xmlns:sp="{SP}" xmlns:wsp="{WSP}" wsp:Optional="true"/>"#);
        let policy = Policy::parse(&xml).unwrap();
        assert_eq!(policy.alternatives().len(), 2);
        assert!(policy.alternatives()[1].assertions.is_empty());
    }

    #[test]
    fn test_nested_alternatives_multiply() {
        let xml = format!(
            r#"<wsp:Policy xmlns:wsp="{WSP}" xmlns:sp="{SP}">
<sp:SupportingTokens><wsp:Policy><wsp:ExactlyOne>
  <sp:UsernameToken><wsp:Policy><sp:HashPassword/></wsp:Policy></sp:UsernameToken>
  <sp:UsernameToken><wsp:Policy><sp:NoPassword/></wsp:Policy></sp:UsernameToken>
</wsp:ExactlyOne></wsp:Policy></sp:SupportingTokens>
<sp:IncludeTimestamp/>
</wsp:Policy>"#
        );
        let policy = Policy::parse(&xml).unwrap();
        let passwords: Vec<_> = policy
            .alternatives()
            .iter()
            .map(|a| match &a.assertions[0] {
                Assertion::Token {
                    token: TokenAssertion::Username { password },
                    ..
                } => *password,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(passwords, vec![PasswordRequirement::Hashed, PasswordRequirement::None]);
        assert!(policy.alternatives().iter().all(|a| a.assertions[1] == Assertion::IncludeTimestamp));
    }

    #[test]
    fn test_symmetric_binding_flattened() {
        let xml = format!(
            r#"<sp:SymmetricBinding xmlns:sp="{SP}"><wsp:Policy xmlns:wsp="{WSP}">
<sp:ProtectionToken><wsp:Policy><sp:SecurityContextToken>
  <sp:IssuerName>urn:issuer</sp:IssuerName>
  <wsp:Policy><sp:RequireDerivedKeys/></wsp:Policy>
</sp:SecurityContextToken></wsp:Policy></sp:ProtectionToken>
<sp:AlgorithmSuite><wsp:Policy><sp:Basic128/></wsp:Policy></sp:AlgorithmSuite>
<sp:EncryptBeforeSigning/>
<sp:Layout><wsp:Policy><sp:Strict/></wsp:Policy></sp:Layout>
</wsp:Policy></sp:SymmetricBinding>"#
        );
        let policy = Policy::parse(&xml).unwrap();
        assert_eq!(
            policy.alternatives()[0].assertions,
            vec![
                Assertion::ProtectionOrder(ProtectionOrder::EncryptBeforeSigning),
                Assertion::Token {
                    role: TokenRole::Protection,
                    token: TokenAssertion::SecurityContext {
                        issuer_name: Some("urn:issuer".into()),
                        require_external_uri_reference: false,
                        require_derived_keys: true,
                    },
                },
                Assertion::AlgorithmSuite("Basic128".into()),
            ]
        );
    }

    #[test]
    fn test_unknown_assertion_kept_as_unsupported() {
        let xml = format!(r#"<sp:KerberosToken xmlns:sp="{SP}"/>"#);
        let policy = Policy::parse(&xml).unwrap();
        assert!(matches!(
            policy.alternatives()[0].assertions[0],
            Assertion::Unsupported(ref name) if name.local() == "KerberosToken"
        ));
    }

    #[test]
    fn test_empty_signed_parts_cover_everything() {
        let xml = format!(r#"<sp:SignedParts xmlns:sp="{SP}"/>"#);
        let policy = Policy::parse(&xml).unwrap();
        let Assertion::SignedParts(parts) = &policy.alternatives()[0].assertions[0] else {
            panic!("expected SignedParts");
        };
        assert!(parts.body && parts.all_headers);
    }
}
