//! Buffers the `wsse:Security` header and handles its children.

use super::{encrypted_key, signature, tokens};
use crate::bsp::BspEnforcer;
use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{
    is_body, is_envelope, is_wsc, TAG_DSIG_SIGNATURE, TAG_WSSE11_SIGNATURE_CONFIRMATION,
    TAG_WSSE_BINARY_SECURITY_TOKEN, TAG_WSSE_SECURITY, TAG_WSSE_USERNAME_TOKEN, TAG_WSU_TIMESTAMP,
    TAG_XENC_ENCRYPTED_KEY, TAG_XENC_REFERENCE_LIST,
};
use crate::context::keys;
use crate::error::{WssError, WssResult};
use crate::xml::{QName, XmlElement, XmlEvent};
use tracing::debug;

/// State shared by the handlers of one security header.
pub(crate) struct HeaderScope {
    /// The whole header, for references between its children
    pub header: XmlElement,
    /// Path of the header element
    pub header_path: Vec<QName>,
    pub bsp: BspEnforcer,
    /// Processors installed once the header has been forwarded
    pub pending: Vec<Box<dyn Processor>>,
    pub timestamps: usize,
    installed: usize,
}

impl HeaderScope {
    /// Unique id for an installed processor.
    pub fn processor_id(&mut self, kind: &str) -> String {
        self.installed += 1;
        format!("{}-{}", kind, self.installed)
    }
}

/// First processor of the inbound chain.
pub struct SecurityHeaderProcessor {
    buffer: Option<Vec<XmlEvent>>,
    seen: bool,
    sent_signature_values: Vec<String>,
}

impl SecurityHeaderProcessor {
    pub fn new(sent_signature_values: Vec<String>) -> Self {
        Self {
            buffer: None,
            seen: false,
            sent_signature_values,
        }
    }

    fn handle_header(&mut self, events: Vec<XmlEvent>, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let header = XmlElement::from_events(&events)?;
        let mut scope = HeaderScope {
            header: header.clone(),
            header_path: chain.document().path().to_vec(),
            bsp: chain.properties().bsp_enforcer(),
            pending: Vec::new(),
            timestamps: 0,
            installed: 0,
        };

        for child in header.elements() {
            let name = child.name();
            debug!(element = %name, "Handling security header element");
            if name == &TAG_WSSE_BINARY_SECURITY_TOKEN {
                tokens::binary_security_token(child, &mut scope, chain)?;
            } else if name == &TAG_WSSE_USERNAME_TOKEN {
                tokens::username_token(child, &mut scope, chain)?;
            } else if name == &TAG_WSU_TIMESTAMP {
                tokens::timestamp(child, &mut scope, chain)?;
            } else if name == &TAG_XENC_ENCRYPTED_KEY {
                encrypted_key::encrypted_key(child, &mut scope, chain)?;
            } else if name == &TAG_XENC_REFERENCE_LIST {
                encrypted_key::reference_list(child, &mut scope, chain)?;
            } else if is_wsc(name, "SecurityContextToken") {
                tokens::security_context_token(child, &mut scope, chain)?;
            } else if is_wsc(name, "DerivedKeyToken") {
                tokens::derived_key_token(child, &mut scope, chain)?;
            } else if name == &TAG_DSIG_SIGNATURE {
                signature::signature(child, &mut scope, chain)?;
            } else if name == &TAG_WSSE11_SIGNATURE_CONFIRMATION {
                tokens::signature_confirmation(child, &mut scope, chain)?;
            } else {
                debug!(element = %name, "Ignoring unknown security header element");
            }
            scope.bsp.finish_structure()?;
        }

        for event in events {
            chain.output(event)?;
        }
        for processor in scope.pending {
            chain.add_processor(processor)?;
        }
        Ok(())
    }

    fn check_signature_confirmations(&self, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if !chain.properties().config.inbound.enable_signature_confirmation_verification {
            return Ok(());
        }
        let received = chain.security_context().list(keys::SIGNATURE_CONFIRMATIONS);
        for sent in &self.sent_signature_values {
            if !received.iter().any(|v| v.as_deref() == Some(sent.as_str())) {
                return Err(WssError::invalid_security(format!(
                    "SignatureConfirmation for signature value {} is missing",
                    sent
                )));
            }
        }
        for value in received.iter().flatten() {
            if !self.sent_signature_values.contains(value) {
                return Err(WssError::invalid_security(format!(
                    "SignatureConfirmation value {} does not match a sent signature",
                    value
                )));
            }
        }
        Ok(())
    }

    fn check_header_present(&self, chain: &ChainContext<'_>) -> WssResult<()> {
        if !self.seen && chain.properties().config.inbound.require_security_header {
            return Err(WssError::invalid_security("Security header is missing"));
        }
        Ok(())
    }
}

impl Processor for SecurityHeaderProcessor {
    fn id(&self) -> &str {
        "security-header"
    }

    fn phase(&self) -> Phase {
        Phase::Preprocessing
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if let Some(buffer) = self.buffer.as_mut() {
            let closes = event.is_end_of(&TAG_WSSE_SECURITY) && chain.document().depth() == 3;
            buffer.push(event);
            if closes {
                let events = self.buffer.take().unwrap_or_default();
                self.seen = true;
                return self.handle_header(events, chain);
            }
            return Ok(());
        }

        if matches!(event, XmlEvent::StartElement(_)) && chain.document().at_security_header() {
            if self.seen {
                return Err(WssError::invalid_security("Message carries more than one Security header"));
            }
            self.buffer = Some(vec![event]);
            return Ok(());
        }

        match &event {
            XmlEvent::StartElement(start) if chain.document().depth() == 1 && is_envelope(&start.name) => {
                let namespace = start.name.namespace().to_string();
                chain.security_context().put(keys::SOAP_NAMESPACE, namespace);
            }
            XmlEvent::StartElement(start) if chain.document().depth() == 2 && is_body(&start.name) => {
                self.check_header_present(chain)?;
            }
            XmlEvent::EndDocument => {
                self.check_header_present(chain)?;
                self.check_signature_confirmations(chain)?;
            }
            _ => {}
        }
        chain.output(event)
    }
}
