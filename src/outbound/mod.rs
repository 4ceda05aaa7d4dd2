//! Outbound processing: secure a message while it is written.
//!
//! The configured actions become processors, in order. Each structure is
//! inserted directly after the `wsse:Security` start tag, so the header lists
//! structures in the reverse of the order they were applied and a receiver
//! can undo them front to back. Structures whose content is only known at the
//! end of the message (signatures, encrypted keys) are inserted by "ending"
//! processors that hold the header back until the document ends.

mod bst;
mod confirmation;
mod derived;
mod encrypt;
mod header;
mod sct;
mod signature;
mod timestamp;
mod username;

pub use bst::BinarySecurityTokenOutputProcessor;
pub use confirmation::SignatureConfirmationOutputProcessor;
pub use derived::{DerivedKeyPurpose, DerivedKeyTokenOutputProcessor, FinalDerivedKeyTokenOutputProcessor};
pub use encrypt::{EncryptEndingOutputProcessor, EncryptOutputProcessor};
pub use header::SecurityHeaderOutputProcessor;
pub use sct::{FinalSecurityContextTokenOutputProcessor, SecurityContextTokenOutputProcessor};
pub use signature::{SignatureEndingOutputProcessor, SignatureOutputProcessor};
pub use timestamp::TimestampOutputProcessor;
pub use username::UsernameTokenOutputProcessor;

use crate::chain::{ChainContext, ProcessorChain};
use crate::config::{KeyIdentifierConfig, OutboundAction};
use crate::constants::{NS_X509V3_TYPE, TAG_WSSE_SECURITY};
use crate::context::SecurityContext;
use crate::credentials::{Certificate, CryptoType};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::token::SecurityTokenReference;
use crate::xml::{XmlElement, XmlEvent, XmlEventSink};
use rsa::RsaPrivateKey;
use tracing::debug;
use uuid::Uuid;

/// Facts about the exchange an outbound message belongs to.
#[derive(Debug, Clone, Default)]
pub struct OutboundOptions {
    /// SignatureValues of the request being answered
    pub signature_values_to_confirm: Vec<String>,
}

/// Entry point for outbound messages.
#[derive(Clone)]
pub struct OutboundWSSec {
    properties: SecurityProperties,
}

impl OutboundWSSec {
    pub fn new(properties: SecurityProperties) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    pub fn process_out_message<S: XmlEventSink>(&self, sink: S) -> WssResult<OutboundSecurityChain<S>> {
        self.process_out_message_with(sink, OutboundOptions::default())
    }

    pub fn process_out_message_with<S: XmlEventSink>(
        &self,
        sink: S,
        options: OutboundOptions,
    ) -> WssResult<OutboundSecurityChain<S>> {
        let config = &self.properties.config.outbound;
        let mut chain = ProcessorChain::new(self.properties.clone(), SecurityContext::new(), sink);
        chain.add_processor(Box::new(SecurityHeaderOutputProcessor::new()))?;

        let derived = config.actions.iter().any(|a| {
            matches!(
                a,
                OutboundAction::SignatureWithDerivedKey | OutboundAction::EncryptWithDerivedKey
            )
        });
        if derived && !config.actions.contains(&OutboundAction::SecurityContextToken) {
            return Err(WssError::config("Derived keys require the security_context_token action"));
        }

        let mut signatures = 0;
        let mut encryptions = 0;
        for action in &config.actions {
            debug!(action = ?action, "Configuring outbound action");
            match action {
                OutboundAction::Timestamp => {
                    chain.add_processor(Box::new(TimestampOutputProcessor::new(config.timestamp_ttl_secs)))?;
                }
                OutboundAction::UsernameToken => {
                    let username = config
                        .username
                        .clone()
                        .ok_or_else(|| WssError::config("The username_token action requires a username"))?;
                    chain.add_processor(Box::new(UsernameTokenOutputProcessor::new(
                        username,
                        config.password_type,
                    )))?;
                }
                OutboundAction::SecurityContextToken => {
                    chain.add_processor(Box::new(SecurityContextTokenOutputProcessor::new(&self.properties)?))?;
                }
                OutboundAction::Signature | OutboundAction::SignatureWithDerivedKey => {
                    signatures += 1;
                    let suffix = numbered(signatures);
                    let signer = if *action == OutboundAction::Signature {
                        let (certificate, key) =
                            self.credential(config.signature_user.as_deref(), "signature_user", true)?;
                        Signer::Certificate(certificate, key)
                    } else {
                        let dkt = DerivedKeyTokenOutputProcessor::new(DerivedKeyPurpose::Signature, &suffix);
                        let token_id = dkt.token_id().to_string();
                        chain.add_processor(Box::new(dkt))?;
                        Signer::DerivedKey { token_id }
                    };
                    for processor in signature::processors(&self.properties, signer, &suffix)? {
                        chain.add_processor(processor)?;
                    }
                }
                OutboundAction::Encrypt | OutboundAction::EncryptWithDerivedKey => {
                    encryptions += 1;
                    let suffix = numbered(encryptions);
                    let recipient = if *action == OutboundAction::Encrypt {
                        let (certificate, _) =
                            self.credential(config.encryption_user.as_deref(), "encryption_user", false)?;
                        Recipient::Certificate(certificate)
                    } else {
                        let dkt = DerivedKeyTokenOutputProcessor::new(DerivedKeyPurpose::Encryption, &suffix);
                        let token_id = dkt.token_id().to_string();
                        chain.add_processor(Box::new(dkt))?;
                        Recipient::DerivedKey { token_id }
                    };
                    for processor in encrypt::processors(&self.properties, recipient, &suffix)? {
                        chain.add_processor(processor)?;
                    }
                }
                OutboundAction::SignatureConfirmation => {
                    chain.add_processor(Box::new(SignatureConfirmationOutputProcessor::new(
                        options.signature_values_to_confirm.clone(),
                    )))?;
                }
            }
        }

        Ok(OutboundSecurityChain { chain, ended: false })
    }

    /// Certificate for a configured alias, with its private key when
    /// `private` is set.
    fn credential(
        &self,
        alias: Option<&str>,
        setting: &str,
        private: bool,
    ) -> WssResult<(Certificate, Option<RsaPrivateKey>)> {
        let alias = alias.ok_or_else(|| WssError::config(format!("Outbound setting {} is missing", setting)))?;
        let certificate = self
            .properties
            .credentials
            .get_x509_certificates(&CryptoType::Alias(alias.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::SecurityTokenUnavailable,
                    format!("No certificate for alias {}", alias),
                )
            })?;
        let key = if private {
            Some(
                self.properties
                    .credentials
                    .get_private_key(&certificate, self.properties.callback.as_ref())?,
            )
        } else {
            None
        };
        Ok((certificate, key))
    }
}

fn numbered(n: usize) -> String {
    if n == 1 {
        String::new()
    } else {
        format!("-{}", n)
    }
}

/// Key used by a signature processor.
pub(crate) enum Signer {
    Certificate(Certificate, Option<RsaPrivateKey>),
    /// HMAC with a derived key token registered during the message
    DerivedKey { token_id: String },
}

/// Key an encrypt processor protects its data with.
pub(crate) enum Recipient {
    /// Random session key wrapped for the certificate holder
    Certificate(Certificate),
    /// A derived key token registered during the message
    DerivedKey { token_id: String },
}

/// Events written to the caller's sink while the message is secured.
pub struct OutboundSecurityChain<S: XmlEventSink> {
    chain: ProcessorChain<S>,
    ended: bool,
}

impl<S: XmlEventSink> OutboundSecurityChain<S> {
    pub fn process_event(&mut self, event: XmlEvent) -> WssResult<()> {
        if matches!(event, XmlEvent::EndDocument) {
            self.ended = true;
        }
        self.chain.process_event(event)
    }

    pub fn process_events(&mut self, events: impl IntoIterator<Item = XmlEvent>) -> WssResult<()> {
        for event in events {
            self.process_event(event)?;
        }
        Ok(())
    }

    pub fn security_context(&self) -> &SecurityContext {
        self.chain.security_context()
    }

    /// Live processors in dispatch order.
    pub fn processor_ids(&mut self) -> WssResult<Vec<String>> {
        self.chain.processor_ids()
    }

    /// End the document if the caller did not, and hand back the sink.
    pub fn finish(mut self) -> WssResult<S> {
        if !self.ended {
            self.process_event(XmlEvent::EndDocument)?;
        }
        Ok(self.chain.into_parts().1)
    }
}

/// Fresh `wsu:Id` value.
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Whether `event` is the start tag of the security header.
pub(crate) fn opens_security_header(event: &XmlEvent, chain: &ChainContext<'_>) -> bool {
    event.is_start_of(&TAG_WSSE_SECURITY) && chain.document().at_security_header()
}

/// Forward `event`; when it opens the security header, insert `elements`
/// right after it. Returns whether the insertion happened.
pub(crate) fn insert_after_security_start(
    event: XmlEvent,
    elements: &[XmlElement],
    chain: &mut ChainContext<'_>,
) -> WssResult<bool> {
    let opens_header = opens_security_header(&event, chain);
    chain.output(event)?;
    if !opens_header {
        return Ok(false);
    }
    let mut sub = chain.sub_chain();
    for element in elements {
        sub.emit_element(element)?;
    }
    sub.close()?;
    Ok(true)
}

/// Holds back the security header and everything after it until the
/// document ends.
#[derive(Debug, Default)]
pub(crate) struct HeaderBuffer {
    events: Option<Vec<XmlEvent>>,
}

impl HeaderBuffer {
    /// Forward or hold `event`. Returns the held events once the document
    /// has ended; the first of them is the security header start tag.
    pub fn push(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<Option<Vec<XmlEvent>>> {
        if let Some(events) = self.events.as_mut() {
            let ended = matches!(event, XmlEvent::EndDocument);
            events.push(event);
            return Ok(if ended { self.events.take() } else { None });
        }
        if opens_security_header(&event, chain) {
            self.events = Some(vec![event]);
            return Ok(None);
        }
        if matches!(event, XmlEvent::EndDocument) {
            return Err(WssError::config("The message ended without a security header"));
        }
        chain.output(event)?;
        Ok(None)
    }

    /// Forward held events with `elements` inserted after the header start.
    pub fn flush(events: Vec<XmlEvent>, elements: &[XmlElement], chain: &mut ChainContext<'_>) -> WssResult<()> {
        let mut events = events.into_iter();
        if let Some(start) = events.next() {
            // The document position has moved on; the first held event is
            // known to be the header start.
            chain.output(start)?;
            let mut sub = chain.sub_chain();
            for element in elements {
                sub.emit_element(element)?;
            }
            sub.close()?;
        }
        for event in events {
            chain.output(event)?;
        }
        Ok(())
    }
}

/// How a certificate is referenced. Direct references need a
/// `BinarySecurityToken`, returned alongside.
pub(crate) fn certificate_reference(
    certificate: &Certificate,
    identifier: KeyIdentifierConfig,
) -> WssResult<(SecurityTokenReference, Option<XmlElement>)> {
    Ok(match identifier {
        KeyIdentifierConfig::IssuerSerial => (SecurityTokenReference::issuer_serial(certificate), None),
        KeyIdentifierConfig::SkiKeyIdentifier => (SecurityTokenReference::subject_key_identifier(certificate)?, None),
        KeyIdentifierConfig::ThumbprintIdentifier => (SecurityTokenReference::thumbprint(certificate), None),
        KeyIdentifierConfig::DirectReference => {
            let id = new_id("X509");
            let bst = bst::binary_security_token(&id, certificate);
            (
                SecurityTokenReference::direct(format!("#{}", id), Some(NS_X509V3_TYPE)),
                Some(bst),
            )
        }
    })
}
