//! `wsse11:SignatureConfirmation` output for responses.

use super::{insert_after_security_start, new_id, opens_security_header};
use crate::chain::{ChainContext, Processor};
use crate::constants::{ATT_NULL_VALUE, ATT_WSU_ID, TAG_WSSE11_SIGNATURE_CONFIRMATION};
use crate::error::WssResult;
use crate::xml::{XmlElement, XmlEvent};

/// Confirms the signature values of the request being answered. An empty
/// list writes a single confirmation without a value, stating the request
/// was unsigned.
#[derive(Debug)]
pub struct SignatureConfirmationOutputProcessor {
    values: Vec<String>,
}

impl SignatureConfirmationOutputProcessor {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    fn elements(&self) -> Vec<XmlElement> {
        let confirmation = || XmlElement::declaring(TAG_WSSE11_SIGNATURE_CONFIRMATION).with_attribute(ATT_WSU_ID, new_id("SC"));
        if self.values.is_empty() {
            return vec![confirmation()];
        }
        self.values
            .iter()
            .map(|value| confirmation().with_attribute(ATT_NULL_VALUE, value.clone()))
            .collect()
    }
}

impl Processor for SignatureConfirmationOutputProcessor {
    fn id(&self) -> &str {
        "signature-confirmation"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if !opens_security_header(&event, chain) {
            return chain.output(event);
        }
        insert_after_security_start(event, &self.elements(), chain)?;
        chain.remove_self();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_confirmation_per_value() {
        let elements = SignatureConfirmationOutputProcessor::new(vec!["abc=".into(), "def=".into()]).elements();
        let values: Vec<_> = elements.iter().filter_map(|e| e.attribute(&ATT_NULL_VALUE)).collect();
        assert_eq!(values, vec!["abc=", "def="]);
        assert!(elements.iter().all(|e| e.id().is_some_and(|id| id.starts_with("SC-"))));
    }

    #[test]
    fn test_unsigned_request_confirmed_without_value() {
        let elements = SignatureConfirmationOutputProcessor::new(Vec::new()).elements();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].attribute(&ATT_NULL_VALUE), None);
    }
}
