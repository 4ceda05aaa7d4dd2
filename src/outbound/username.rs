//! `wsse:UsernameToken` output.

use super::{insert_after_security_start, new_id, opens_security_header};
use crate::chain::{ChainContext, Processor};
use crate::config::PasswordType;
use crate::constants::{
    ATT_NULL_ENCODING_TYPE, ATT_NULL_TYPE, ATT_WSU_ID, NS_BASE64_ENCODING, NS_PASSWORD_DIGEST, NS_PASSWORD_TEXT,
    NS_WSU10, PREFIX_WSU, TAG_WSSE_NONCE, TAG_WSSE_PASSWORD, TAG_WSSE_USERNAME, TAG_WSSE_USERNAME_TOKEN,
    TAG_WSU_CREATED,
};
use crate::credentials::CallbackUsage;
use crate::crypto::{base64_encode, random_bytes};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::token::derived::password_digest;
use crate::xml::{StartElement, XmlElement, XmlEvent};
use chrono::{SecondsFormat, Utc};

/// Writes a username token whose password comes from the password callback.
#[derive(Debug)]
pub struct UsernameTokenOutputProcessor {
    username: String,
    password_type: PasswordType,
}

impl UsernameTokenOutputProcessor {
    pub fn new(username: String, password_type: PasswordType) -> Self {
        Self { username, password_type }
    }

    fn element(&self, password: &str) -> XmlElement {
        let mut token = XmlElement::declaring(TAG_WSSE_USERNAME_TOKEN)
            .with_attribute(ATT_WSU_ID, new_id("UsernameToken"))
            .with_child(XmlElement::new(StartElement::new(TAG_WSSE_USERNAME)).with_text(self.username.clone()));
        match self.password_type {
            PasswordType::Text => token.push_child(
                XmlElement::new(StartElement::new(TAG_WSSE_PASSWORD))
                    .with_attribute(ATT_NULL_TYPE, NS_PASSWORD_TEXT)
                    .with_text(password),
            ),
            PasswordType::Digest => {
                let nonce = random_bytes(16);
                let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                token.push_child(
                    XmlElement::new(StartElement::new(TAG_WSSE_PASSWORD))
                        .with_attribute(ATT_NULL_TYPE, NS_PASSWORD_DIGEST)
                        .with_text(password_digest(&nonce, &created, password)),
                );
                token.push_child(
                    XmlElement::new(StartElement::new(TAG_WSSE_NONCE))
                        .with_attribute(ATT_NULL_ENCODING_TYPE, NS_BASE64_ENCODING)
                        .with_text(base64_encode(&nonce)),
                );
                token.push_child(
                    XmlElement::new(StartElement::new(TAG_WSU_CREATED).with_namespace(PREFIX_WSU, NS_WSU10))
                        .with_text(created),
                );
            }
        }
        token
    }
}

impl Processor for UsernameTokenOutputProcessor {
    fn id(&self) -> &str {
        "username-token"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if !opens_security_header(&event, chain) {
            return chain.output(event);
        }
        let password = chain
            .properties()
            .callback
            .resolve(&self.username, CallbackUsage::UsernameToken)
            .and_then(|c| c.password)
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::FailedAuthentication,
                    format!("No password for user {}", self.username),
                )
            })?;
        let element = self.element(&password);
        insert_after_security_start(event, &[element], chain)?;
        chain.remove_self();
        Ok(())
    }
}
