//! Inbound processing: verify and decrypt a secured message while it
//! streams through the processor chain.
//!
//! The security header is buffered and its children are handled in document
//! order. Handling a structure may install further processors (decryption,
//! signature reference verification) that act on the rest of the message.

mod decrypt;
mod encrypted_key;
mod header;
mod parts;
mod signature;
mod tokens;

pub use decrypt::DecryptProcessor;
pub use header::SecurityHeaderProcessor;
pub use parts::PartsProcessor;
pub use signature::SignatureReferenceVerifyProcessor;

use crate::chain::ProcessorChain;
use crate::context::SecurityContext;
use crate::error::WssResult;
use crate::event::{HttpsTokenEvent, SecurityEvent, SecurityEventListener};
use crate::properties::SecurityProperties;
use crate::xml::{XmlEvent, XmlEventSource};
use std::collections::VecDeque;
use tracing::debug;

/// Facts about a message known from outside it.
#[derive(Debug, Clone, Default)]
pub struct InboundOptions {
    /// Transport-level token, reported before any message event
    pub https_token: Option<HttpsTokenEvent>,

    /// SignatureValues of the request this message answers
    pub sent_signature_values: Vec<String>,
}

/// Entry point for inbound messages.
#[derive(Clone)]
pub struct InboundWSSec {
    properties: SecurityProperties,
}

impl InboundWSSec {
    pub fn new(properties: SecurityProperties) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    pub fn process_in_message<S: XmlEventSource>(
        &self,
        source: S,
        listener: Option<Box<dyn SecurityEventListener>>,
    ) -> WssResult<InboundSecurityStream<S>> {
        self.process_in_message_with(source, listener, InboundOptions::default())
    }

    pub fn process_in_message_with<S: XmlEventSource>(
        &self,
        source: S,
        listener: Option<Box<dyn SecurityEventListener>>,
        options: InboundOptions,
    ) -> WssResult<InboundSecurityStream<S>> {
        let security = match listener {
            Some(listener) => SecurityContext::with_listener(listener),
            None => SecurityContext::new(),
        };
        let mut chain = ProcessorChain::new(self.properties.clone(), security, VecDeque::new());
        if let Some(https) = options.https_token {
            chain
                .security_context_mut()
                .register_security_event(SecurityEvent::HttpsToken(https))?;
        }
        chain.add_processor(Box::new(SecurityHeaderProcessor::new(options.sent_signature_values)))?;
        chain.add_processor(Box::new(PartsProcessor::new()))?;
        Ok(InboundSecurityStream {
            source,
            chain,
            saw_end: false,
            finished: false,
        })
    }
}

/// Processed events of one inbound message.
pub struct InboundSecurityStream<S: XmlEventSource> {
    source: S,
    chain: ProcessorChain<VecDeque<XmlEvent>>,
    saw_end: bool,
    finished: bool,
}

impl<S: XmlEventSource> InboundSecurityStream<S> {
    /// Security events emitted so far, in order.
    pub fn security_events(&self) -> &[SecurityEvent] {
        self.chain.security_context().security_events()
    }

    pub fn security_context(&self) -> &SecurityContext {
        self.chain.security_context()
    }

    /// Drive the message to completion and collect the processed events.
    pub fn read_all(&mut self) -> WssResult<Vec<XmlEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    pub fn into_security_context(self) -> SecurityContext {
        self.chain.into_parts().0
    }

    fn finish(&mut self) -> WssResult<()> {
        if !self.saw_end {
            self.saw_end = true;
            self.chain.process_event(XmlEvent::EndDocument)?;
        }
        self.finished = true;
        debug!(
            events = self.chain.security_context().security_events().len(),
            "Inbound message processed"
        );
        self.chain.security_context_mut().finish_listener()
    }
}

impl<S: XmlEventSource> XmlEventSource for InboundSecurityStream<S> {
    fn next_event(&mut self) -> WssResult<Option<XmlEvent>> {
        loop {
            if let Some(event) = self.chain.sink_mut().pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.source.next_event()? {
                Some(event) => {
                    if matches!(event, XmlEvent::EndDocument) {
                        self.saw_end = true;
                    }
                    self.chain.process_event(event)?;
                }
                None => self.finish()?,
            }
        }
    }
}
