//! `wsu:Timestamp` output.

use super::{insert_after_security_start, new_id, opens_security_header};
use crate::chain::{ChainContext, Processor};
use crate::constants::{ATT_WSU_ID, TAG_WSU_CREATED, TAG_WSU_EXPIRES, TAG_WSU_TIMESTAMP};
use crate::error::WssResult;
use crate::xml::{StartElement, XmlElement, XmlEvent};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Writes a timestamp created now and expiring after the configured ttl.
#[derive(Debug)]
pub struct TimestampOutputProcessor {
    ttl_secs: u64,
}

impl TimestampOutputProcessor {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    fn element(&self, now: DateTime<Utc>) -> XmlElement {
        let expires = now + Duration::seconds(self.ttl_secs as i64);
        XmlElement::declaring(TAG_WSU_TIMESTAMP)
            .with_attribute(ATT_WSU_ID, new_id("TS"))
            .with_child(
                XmlElement::new(StartElement::new(TAG_WSU_CREATED))
                    .with_text(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
            .with_child(
                XmlElement::new(StartElement::new(TAG_WSU_EXPIRES))
                    .with_text(expires.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
    }
}

impl Processor for TimestampOutputProcessor {
    fn id(&self) -> &str {
        "timestamp"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
        if !opens_security_header(&event, chain) {
            return chain.output(event);
        }
        let element = self.element(Utc::now());
        insert_after_security_start(event, &[element], chain)?;
        chain.remove_self();
        Ok(())
    }
}
