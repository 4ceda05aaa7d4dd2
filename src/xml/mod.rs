//! XML event layer: owned events, a namespace-aware reader, a writer, a small
//! element tree for bounded structures, and exclusive canonicalization.

pub mod c14n;
pub mod event;
pub mod reader;
pub mod tree;
pub mod writer;

pub use event::{path_to_string, Attribute, Namespace, QName, StartElement, XmlEvent};
pub use reader::{parse_fragment, XmlReader};
pub use tree::{XmlElement, XmlNode};
pub use writer::{events_to_string, XmlWriter};

use crate::error::WssResult;
use std::collections::VecDeque;

/// Pull-based producer of XML events.
pub trait XmlEventSource {
    /// Next event, or `None` once the document is exhausted.
    fn next_event(&mut self) -> WssResult<Option<XmlEvent>>;
}

/// Push-based consumer of XML events.
pub trait XmlEventSink {
    fn write_event(&mut self, event: XmlEvent) -> WssResult<()>;
}

impl XmlEventSink for Vec<XmlEvent> {
    fn write_event(&mut self, event: XmlEvent) -> WssResult<()> {
        self.push(event);
        Ok(())
    }
}

impl XmlEventSink for VecDeque<XmlEvent> {
    fn write_event(&mut self, event: XmlEvent) -> WssResult<()> {
        self.push_back(event);
        Ok(())
    }
}

impl XmlEventSource for std::vec::IntoIter<XmlEvent> {
    fn next_event(&mut self) -> WssResult<Option<XmlEvent>> {
        Ok(self.next())
    }
}

impl XmlEventSource for VecDeque<XmlEvent> {
    fn next_event(&mut self) -> WssResult<Option<XmlEvent>> {
        Ok(self.pop_front())
    }
}
