//! Event serializer on top of quick-xml's `Writer`.

use super::event::XmlEvent;
use super::XmlEventSink;
use crate::error::{WssError, WssResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

/// Serializes [`XmlEvent`]s to a byte stream.
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
    write_declaration: bool,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
            write_declaration: true,
        }
    }

    /// Skip the `<?xml ...?>` declaration on `StartDocument`.
    pub fn without_declaration(mut self) -> Self {
        self.write_declaration = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn emit(&mut self, event: Event<'_>) -> WssResult<()> {
        self.writer
            .write_event(event)
            .map_err(|e| WssError::xml(e.to_string()))
    }
}

impl<W: Write> XmlEventSink for XmlWriter<W> {
    fn write_event(&mut self, event: XmlEvent) -> WssResult<()> {
        match event {
            XmlEvent::StartDocument => {
                if self.write_declaration {
                    self.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
                }
                Ok(())
            }
            XmlEvent::StartElement(start) => {
                let name = start.name.qualified();
                let mut tag = BytesStart::new(name.as_str());
                for ns in &start.namespaces {
                    let key = if ns.prefix.is_empty() {
                        "xmlns".to_string()
                    } else {
                        format!("xmlns:{}", ns.prefix)
                    };
                    tag.push_attribute((key.as_str(), ns.uri.as_str()));
                }
                for attr in &start.attributes {
                    let key = attr.name.qualified();
                    tag.push_attribute((key.as_str(), attr.value.as_str()));
                }
                self.emit(Event::Start(tag))
            }
            XmlEvent::EndElement(name) => {
                let name = name.qualified();
                self.emit(Event::End(BytesEnd::new(name.as_str())))
            }
            XmlEvent::Characters(text) => self.emit(Event::Text(BytesText::new(&text))),
            XmlEvent::Comment(text) => self.emit(Event::Comment(BytesText::from_escaped(text.as_str()))),
            XmlEvent::EndDocument => Ok(()),
        }
    }
}

/// Serialize a complete event sequence to a string.
pub fn events_to_string(events: &[XmlEvent]) -> WssResult<String> {
    let mut writer = XmlWriter::new(Vec::new()).without_declaration();
    for event in events {
        writer.write_event(event.clone())?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| WssError::xml(e.to_string()))
}
