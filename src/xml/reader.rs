//! XML tokenizer producing owned [`XmlEvent`]s.
//!
//! Uses quick-xml, which never expands external entities. DOCTYPE and ENTITY
//! declarations are rejected outright before and during parsing.

use super::event::{Attribute, Namespace, QName, StartElement, XmlEvent};
use super::XmlEventSource;
use crate::constants::NS_XML;
use crate::error::{ErrorCode, WssError, WssResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::collections::VecDeque;
use std::io::{BufRead, Cursor};

/// Streaming XML reader.
pub struct XmlReader<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    pending: VecDeque<XmlEvent>,
    started: bool,
    finished: bool,
}

impl XmlReader<Cursor<Vec<u8>>> {
    /// Reader over an in-memory document.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> WssResult<Self> {
        let data = data.into();
        let text = std::str::from_utf8(&data)
            .map_err(|e| WssError::xml(format!("Invalid UTF-8: {}", e)))?;
        check_xxe_patterns(text)?;
        Ok(Self::new(Cursor::new(data)))
    }

    pub fn from_str(xml: &str) -> WssResult<Self> {
        Self::from_bytes(xml.as_bytes().to_vec())
    }
}

impl<R: BufRead> XmlReader<R> {
    /// Reader over an arbitrary buffered source.
    pub fn new(source: R) -> Self {
        let mut reader = NsReader::from_reader(source);
        reader.config_mut().expand_empty_elements = true;
        Self {
            reader,
            buf: Vec::new(),
            pending: VecDeque::new(),
            started: false,
            finished: false,
        }
    }

    fn read_next(&mut self) -> WssResult<()> {
        let event = {
            let (resolved, event) = self
                .reader
                .read_resolved_event_into(&mut self.buf)
                .map_err(|e| WssError::xml(e.to_string()))?;
            let namespace = resolved_namespace(resolved)?;
            match event {
                Event::Start(ref e) => Some(XmlEvent::StartElement(start_element(&self.reader, namespace, e)?)),
                Event::End(ref e) => {
                    let local = utf8(e.local_name().as_ref())?;
                    let prefix = e
                        .name()
                        .prefix()
                        .map(|p| utf8(p.as_ref()))
                        .transpose()?
                        .unwrap_or_default();
                    Some(XmlEvent::EndElement(QName::with_prefix(namespace, local, prefix)))
                }
                Event::Text(ref e) => {
                    let text = e.unescape().map_err(|e| WssError::xml(e.to_string()))?;
                    if text.is_empty() {
                        None
                    } else {
                        Some(XmlEvent::Characters(text.into_owned()))
                    }
                }
                Event::CData(e) => Some(XmlEvent::Characters(utf8(&e.into_inner())?)),
                Event::Comment(ref e) => Some(XmlEvent::Comment(utf8(e)?)),
                Event::Decl(_) | Event::PI(_) => None,
                Event::DocType(_) => {
                    return Err(WssError::new(
                        ErrorCode::InvalidSecurity,
                        "DOCTYPE declarations are not allowed",
                    ))
                }
                Event::Eof => {
                    self.finished = true;
                    Some(XmlEvent::EndDocument)
                }
                Event::Empty(_) => {
                    return Err(WssError::xml("unexpected empty element event"));
                }
            }
        };
        if let Some(event) = event {
            self.pending.push_back(event);
        }
        self.buf.clear();
        Ok(())
    }

    /// Drain the reader into a vector.
    pub fn read_all(mut self) -> WssResult<Vec<XmlEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }
}

impl<R: BufRead> XmlEventSource for XmlReader<R> {
    fn next_event(&mut self) -> WssResult<Option<XmlEvent>> {
        if !self.started {
            self.started = true;
            return Ok(Some(XmlEvent::StartDocument));
        }
        while self.pending.is_empty() && !self.finished {
            self.read_next()?;
        }
        Ok(self.pending.pop_front())
    }
}

fn start_element<R>(reader: &NsReader<R>, namespace: String, e: &BytesStart<'_>) -> WssResult<StartElement> {
    let local = utf8(e.local_name().as_ref())?;
    let prefix = e
        .name()
        .prefix()
        .map(|p| utf8(p.as_ref()))
        .transpose()?
        .unwrap_or_default();
    let mut start = StartElement::new(QName::with_prefix(namespace, local, prefix));

    for attr in e.attributes() {
        let attr = attr.map_err(|e| WssError::xml(e.to_string()))?;
        let key = attr.key.as_ref();
        let value = attr
            .unescape_value()
            .map_err(|e| WssError::xml(e.to_string()))?
            .into_owned();

        if key == b"xmlns" {
            start.namespaces.push(Namespace::new("", value));
            continue;
        }
        if let Some(declared) = key.strip_prefix(b"xmlns:") {
            start.namespaces.push(Namespace::new(utf8(declared)?, value));
            continue;
        }

        let local = utf8(attr.key.local_name().as_ref())?;
        let prefix = attr
            .key
            .prefix()
            .map(|p| utf8(p.as_ref()))
            .transpose()?
            .unwrap_or_default();
        let name = if prefix.is_empty() {
            QName::local_only(local)
        } else if prefix == "xml" {
            QName::with_prefix(NS_XML, local, prefix)
        } else {
            let (resolved, _) = reader.resolve_attribute(attr.key);
            QName::with_prefix(resolved_namespace(resolved)?, local, prefix)
        };
        start.attributes.push(Attribute::new(name, value));
    }
    Ok(start)
}

/// Parse decrypted content with the namespace bindings in scope at the
/// insertion point. Returns the events of the fragment only.
pub fn parse_fragment(content: &str, in_scope: &[Namespace]) -> WssResult<Vec<XmlEvent>> {
    check_xxe_patterns(content)?;
    let mut wrapper = String::from("<fragment");
    for ns in in_scope {
        if ns.prefix.is_empty() {
            wrapper.push_str(" xmlns=\"");
        } else {
            wrapper.push_str(" xmlns:");
            wrapper.push_str(&ns.prefix);
            wrapper.push_str("=\"");
        }
        wrapper.push_str(&escape_attribute(&ns.uri));
        wrapper.push('"');
    }
    wrapper.push('>');
    wrapper.push_str(content);
    wrapper.push_str("</fragment>");

    let events = XmlReader::new(Cursor::new(wrapper.into_bytes())).read_all()?;
    // StartDocument, <fragment>, ..., </fragment>, EndDocument
    if events.len() < 4 {
        return Err(WssError::xml("empty fragment"));
    }
    Ok(events[2..events.len() - 2].to_vec())
}

/// Check for XXE attack patterns.
pub fn check_xxe_patterns(xml: &str) -> WssResult<()> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(WssError::new(
            ErrorCode::InvalidSecurity,
            "DOCTYPE declarations are not allowed",
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(WssError::new(
            ErrorCode::InvalidSecurity,
            "Entity declarations are not allowed",
        ));
    }

    Ok(())
}

fn resolved_namespace(resolved: ResolveResult<'_>) -> WssResult<String> {
    match resolved {
        ResolveResult::Bound(ns) => utf8(ns.as_ref()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(WssError::xml(format!(
            "Unknown namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn utf8(bytes: &[u8]) -> WssResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| WssError::xml(format!("Invalid UTF-8: {}", e)))
}

fn escape_attribute(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('"', "&quot;")
}
