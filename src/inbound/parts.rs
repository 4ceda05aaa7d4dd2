//! Reports which message parts were present, signed and encrypted.

use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{is_body, is_header, TAG_WSSE_SECURITY};
use crate::context::keys;
use crate::error::WssResult;
use crate::event::{PartEvent, SecurityEvent};
use crate::xml::{QName, XmlEvent};

/// Last processor of the inbound chain. Emits `RequiredPart` and
/// `Operation` as parts begin, and `SignedPart`/`EncryptedPart` as they end,
/// once every decryption and digest check for them has run.
#[derive(Debug, Default)]
pub struct PartsProcessor {
    operation_seen: bool,
}

impl PartsProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn part_events(path: &[QName], content: bool, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let ctx = chain.security_context();
        let mut order = ctx.list(keys::PROTECTION_ORDER).to_vec();
        order.reverse();

        let mut signed = PartEvent::new(path.to_vec(), ctx.list(keys::SIGNED_PATHS).iter().any(|p| p == path));
        signed.protection_order = order.clone();
        let mut encrypted = PartEvent::new(path.to_vec(), ctx.list(keys::ENCRYPTED_PATHS).iter().any(|p| p == path));
        encrypted.content = content;
        encrypted.protection_order = order;

        ctx.register_security_event(SecurityEvent::SignedPart(signed))?;
        ctx.register_security_event(SecurityEvent::EncryptedPart(encrypted))
    }
}

impl Processor for PartsProcessor {
    fn id(&self) -> &str {
        "parts"
    }

    fn phase(&self) -> Phase {
        Phase::Postprocessing
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        let path = chain.document().path().to_vec();
        let in_header = path.len() == 3 && is_header(&path[1]);
        let in_body = path.len() >= 2 && is_body(&path[1]);

        match &event {
            XmlEvent::StartElement(start) => {
                if in_header || (path.len() == 2 && in_body) {
                    chain
                        .security_context()
                        .register_security_event(SecurityEvent::required_part(path.clone()))?;
                }
                if path.len() == 3 && in_body && !self.operation_seen {
                    self.operation_seen = true;
                    chain
                        .security_context()
                        .register_security_event(SecurityEvent::operation(start.name.clone()))?;
                }
            }
            XmlEvent::EndElement(name) => {
                if in_header && name != &TAG_WSSE_SECURITY {
                    Self::part_events(&path, false, chain)?;
                } else if path.len() == 2 && in_body {
                    Self::part_events(&path, true, chain)?;
                }
            }
            _ => {}
        }
        chain.output(event)
    }
}
