//! `wsse:BinarySecurityToken` output for directly referenced certificates.

use super::insert_after_security_start;
use crate::chain::{ChainContext, Phase, Processor};
use crate::constants::{
    ATT_NULL_ENCODING_TYPE, ATT_NULL_VALUE_TYPE, ATT_WSU_ID, NS_BASE64_ENCODING, NS_X509V3_TYPE,
    TAG_WSSE_BINARY_SECURITY_TOKEN,
};
use crate::credentials::Certificate;
use crate::crypto::base64_encode;
use crate::error::WssResult;
use crate::xml::{XmlElement, XmlEvent};

/// The token element for `certificate`.
pub(crate) fn binary_security_token(id: &str, certificate: &Certificate) -> XmlElement {
    XmlElement::declaring(TAG_WSSE_BINARY_SECURITY_TOKEN)
        .with_attribute(ATT_NULL_ENCODING_TYPE, NS_BASE64_ENCODING)
        .with_attribute(ATT_NULL_VALUE_TYPE, NS_X509V3_TYPE)
        .with_attribute(ATT_WSU_ID, id)
        .with_text(base64_encode(&certificate.encoded))
}

/// Inserts a token after every processor that writes structures referring
/// to it, so the token precedes them in the header.
pub struct BinarySecurityTokenOutputProcessor {
    id: String,
    element: XmlElement,
}

impl BinarySecurityTokenOutputProcessor {
    pub fn new(element: XmlElement) -> Self {
        let id = format!("binary-security-token-{}", element.id().unwrap_or_default());
        Self { id, element }
    }
}

impl Processor for BinarySecurityTokenOutputProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        Phase::Postprocessing
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if insert_after_security_start(event, std::slice::from_ref(&self.element), chain)? {
            chain.remove_self();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::test_keys;
    use crate::crypto::base64_decode;

    #[test]
    fn test_token_carries_encoded_certificate() {
        let certificate = test_keys::certificate("alice", 0);
        let element = binary_security_token("X509-1", &certificate);
        assert_eq!(element.id(), Some("X509-1"));
        assert_eq!(element.attribute(&ATT_NULL_VALUE_TYPE), Some(NS_X509V3_TYPE));
        assert_eq!(base64_decode(&element.text()).unwrap(), certificate.encoded);

        let processor = BinarySecurityTokenOutputProcessor::new(element);
        assert_eq!(processor.id(), "binary-security-token-X509-1");
        assert_eq!(processor.phase(), Phase::Postprocessing);
    }
}
