//! Creates the `wsse:Security` header the other outbound processors fill.

use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{is_body, is_envelope, is_header, NS_SOAP11, TAG_WSSE_SECURITY};
use crate::context::keys;
use crate::error::{WssError, WssResult};
use crate::xml::{QName, StartElement, XmlEvent};

/// First outbound processor. Writes an empty, must-understand `Security`
/// element as the first child of `Header`, creating `Header` when the
/// message has none.
#[derive(Debug, Default)]
pub struct SecurityHeaderOutputProcessor {
    envelope: Option<QName>,
    written: bool,
}

impl SecurityHeaderOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn soap_name(&self, local: &str) -> QName {
        match &self.envelope {
            Some(envelope) => QName::with_prefix(envelope.namespace(), local, envelope.prefix()),
            None => QName::with_prefix(NS_SOAP11, local, "soap"),
        }
    }

    fn security_start(&self) -> StartElement {
        let must_understand = match &self.envelope {
            Some(envelope) if !envelope.prefix().is_empty() => {
                QName::with_prefix(envelope.namespace(), "mustUnderstand", envelope.prefix())
            }
            Some(envelope) => QName::with_prefix(envelope.namespace(), "mustUnderstand", "soap"),
            None => QName::with_prefix(NS_SOAP11, "mustUnderstand", "soap"),
        };
        StartElement::declaring(TAG_WSSE_SECURITY).with_attribute(must_understand, "1")
    }

    fn emit_security(&mut self, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let mut sub = chain.sub_chain();
        sub.emit(XmlEvent::start(self.security_start()))?;
        sub.emit(XmlEvent::end(TAG_WSSE_SECURITY))?;
        sub.close()?;
        self.written = true;
        Ok(())
    }
}

impl Processor for SecurityHeaderOutputProcessor {
    fn id(&self) -> &str {
        "security-header"
    }

    fn phase(&self) -> Phase {
        Phase::Preprocessing
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let depth = chain.document().depth();
        let Some(start) = event.as_start_element() else {
            if matches!(event, XmlEvent::EndDocument) && !self.written {
                return Err(WssError::xml("The message has no SOAP Body"));
            }
            return chain.output(event);
        };

        if depth == 1 {
            if !is_envelope(&start.name) {
                return Err(WssError::xml(format!("Expected a SOAP Envelope, found {}", start.name)));
            }
            self.envelope = Some(start.name.clone());
            let namespace = start.name.namespace().to_string();
            chain.security_context().put(keys::SOAP_NAMESPACE, namespace);
            return chain.output(event);
        }
        if depth == 3 && start.name == TAG_WSSE_SECURITY && is_header(&chain.document().path()[1]) {
            return Err(WssError::invalid_security("The message already carries a Security header"));
        }
        if depth == 2 && !self.written {
            if is_header(&start.name) {
                chain.output(event)?;
                return self.emit_security(chain);
            }
            if is_body(&start.name) {
                let header = self.soap_name("Header");
                let mut sub = chain.sub_chain();
                sub.emit(XmlEvent::start(StartElement::new(header.clone())))?;
                sub.emit(XmlEvent::start(self.security_start()))?;
                sub.emit(XmlEvent::end(TAG_WSSE_SECURITY))?;
                sub.emit(XmlEvent::end(header))?;
                sub.close()?;
                self.written = true;
            }
        }
        chain.output(event)
    }
}
