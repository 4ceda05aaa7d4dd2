//! Minimal element tree for bounded structures such as security header
//! children, encrypted payloads and policy documents.

use super::event::{QName, StartElement, XmlEvent};
use crate::error::{WssError, WssResult};

/// Child node of an [`XmlElement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

/// An element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub start: StartElement,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(start: StartElement) -> Self {
        Self {
            start,
            children: Vec::new(),
        }
    }

    /// Element that declares its own prefix.
    pub fn declaring(name: QName) -> Self {
        Self::new(StartElement::declaring(name))
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.start.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Build a tree from a balanced event sequence. Document events and
    /// whitespace around the root are skipped; any other content after the
    /// root element closes is rejected.
    pub fn from_events(events: &[XmlEvent]) -> WssResult<Self> {
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        for event in events {
            if matches!(event, XmlEvent::StartDocument | XmlEvent::EndDocument) {
                continue;
            }
            if root.is_some() {
                if let XmlEvent::Characters(text) = event {
                    if text.trim().is_empty() {
                        continue;
                    }
                }
                return Err(WssError::xml("content after root element"));
            }
            match event {
                XmlEvent::StartElement(start) => stack.push(XmlElement::new(start.clone())),
                XmlEvent::EndElement(name) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| WssError::xml("unbalanced end element"))?;
                    if &element.start.name != name {
                        return Err(WssError::xml(format!(
                            "mismatched end element {} for {}",
                            name, element.start.name
                        )));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }
                XmlEvent::Characters(text) => match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Text(text.clone())),
                    None if text.trim().is_empty() => {}
                    None => return Err(WssError::xml("text outside of root element")),
                },
                XmlEvent::Comment(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Comment(text.clone()));
                    }
                }
                XmlEvent::StartDocument | XmlEvent::EndDocument => {}
            }
        }

        root.ok_or_else(|| WssError::xml("incomplete element"))
    }

    pub fn to_events(&self) -> Vec<XmlEvent> {
        let mut events = Vec::new();
        self.write_events(&mut events);
        events
    }

    pub fn write_events(&self, out: &mut Vec<XmlEvent>) {
        out.push(XmlEvent::StartElement(self.start.clone()));
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_events(out),
                XmlNode::Text(t) => out.push(XmlEvent::Characters(t.clone())),
                XmlNode::Comment(c) => out.push(XmlEvent::Comment(c.clone())),
            }
        }
        out.push(XmlEvent::EndElement(self.start.name.clone()));
    }

    pub fn name(&self) -> &QName {
        &self.start.name
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.start.attribute(name)
    }

    pub fn id(&self) -> Option<&str> {
        self.start.id()
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child(&self, name: &QName) -> Option<&XmlElement> {
        self.elements().find(|e| e.name() == name)
    }

    pub fn children_named<'a>(&'a self, name: &QName) -> impl Iterator<Item = &'a XmlElement> + 'a {
        let name = name.clone();
        self.elements().filter(move |e| e.name() == &name)
    }

    /// First child element whose local name matches, in any namespace.
    pub fn child_local(&self, local: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name().local() == local)
    }

    /// Concatenated text of the direct children, trimmed.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                text.push_str(t);
            }
        }
        text.trim().to_string()
    }

    /// Text of a direct child element.
    pub fn child_text(&self, name: &QName) -> Option<String> {
        self.child(name).map(XmlElement::text)
    }

    /// Depth-first search over this element and its descendants.
    pub fn find<P>(&self, predicate: &P) -> Option<&XmlElement>
    where
        P: Fn(&XmlElement) -> bool,
    {
        if predicate(self) {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlReader;

    fn parse(xml: &str) -> XmlElement {
        let events = XmlReader::from_str(xml).unwrap().read_all().unwrap();
        XmlElement::from_events(&events).unwrap()
    }

    #[test]
    fn test_tree_lookup() {
        let root = parse(r#"<a xmlns="urn:t" Id="x"><b>one</b><c><b> two </b></c></a>"#);
        assert_eq!(root.id(), Some("x"));
        let b = QName::new("urn:t", "b");
        assert_eq!(root.child_text(&b).as_deref(), Some("one"));
        assert_eq!(root.children_named(&b).count(), 1);
        let nested = root.child_local("c").and_then(|c| c.child(&b)).unwrap();
        assert_eq!(nested.text(), "two");
        assert!(root.find(&|e| e.text() == "two").is_some());
    }

    #[test]
    fn test_round_trip_events() {
        let events = XmlReader::from_str("<a><b>t</b><!--c--></a>").unwrap().read_all().unwrap();
        let root = XmlElement::from_events(&events).unwrap();
        assert_eq!(root.to_events(), events[1..events.len() - 1].to_vec());
    }

    #[test]
    fn test_document_events_skipped() {
        let events = XmlReader::from_str("<?xml version=\"1.0\"?>\n<a><b/></a>\n").unwrap().read_all().unwrap();
        assert_eq!(events.last(), Some(&XmlEvent::EndDocument));
        let root = XmlElement::from_events(&events).unwrap();
        assert_eq!(root.name(), &QName::local_only("a"));
        assert_eq!(root.elements().count(), 1);
    }

    #[test]
    fn test_content_after_root_rejected() {
        let a = QName::local_only("a");
        let events = vec![
            XmlEvent::start(StartElement::new(a.clone())),
            XmlEvent::EndElement(a),
            XmlEvent::text("trailing"),
        ];
        assert!(XmlElement::from_events(&events).is_err());
    }

    #[test]
    fn test_unbalanced_events_rejected() {
        let events = vec![XmlEvent::start(StartElement::new(QName::local_only("a")))];
        assert!(XmlElement::from_events(&events).is_err());
    }
}
