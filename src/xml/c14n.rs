//! Exclusive XML canonicalization (without comments) over event sequences.
//!
//! Namespace declarations are rendered only where a prefix is visibly
//! utilized by an element or one of its attributes and the nearest output
//! ancestor did not already render the same binding. `InclusiveNamespaces`
//! prefix lists are not honoured.

use super::event::{Namespace, XmlEvent};
use super::tree::XmlElement;
use crate::error::{WssError, WssResult};

/// Canonicalize a balanced event sequence.
pub fn canonicalize(events: &[XmlEvent]) -> WssResult<Vec<u8>> {
    let mut out = String::new();
    // One frame per open element: the bindings it rendered.
    let mut rendered: Vec<Vec<Namespace>> = Vec::new();

    for event in events {
        match event {
            XmlEvent::StartElement(start) => {
                let mut utilized: Vec<(String, String)> = Vec::new();
                utilized.push((start.name.prefix().to_string(), start.name.namespace().to_string()));
                for attr in &start.attributes {
                    let prefix = attr.name.prefix();
                    if !prefix.is_empty() && prefix != "xml" {
                        utilized.push((prefix.to_string(), attr.name.namespace().to_string()));
                    }
                }

                let mut frame: Vec<Namespace> = Vec::new();
                for (prefix, uri) in utilized {
                    if frame.iter().any(|ns| ns.prefix == prefix) {
                        continue;
                    }
                    let current = nearest_binding(&rendered, &prefix);
                    let needs_render = match current {
                        Some(bound) => bound != uri,
                        // An unrendered default namespace is empty.
                        None => !(prefix.is_empty() && uri.is_empty()),
                    };
                    if needs_render {
                        frame.push(Namespace::new(prefix, uri));
                    }
                }
                frame.sort_by(|a, b| a.prefix.cmp(&b.prefix));

                let mut attributes: Vec<_> = start.attributes.iter().collect();
                attributes.sort_by(|a, b| {
                    (a.name.namespace(), a.name.local()).cmp(&(b.name.namespace(), b.name.local()))
                });

                out.push('<');
                out.push_str(&start.name.qualified());
                for ns in &frame {
                    if ns.prefix.is_empty() {
                        out.push_str(" xmlns=\"");
                    } else {
                        out.push_str(" xmlns:");
                        out.push_str(&ns.prefix);
                        out.push_str("=\"");
                    }
                    escape_attribute(&ns.uri, &mut out);
                    out.push('"');
                }
                for attr in attributes {
                    out.push(' ');
                    out.push_str(&attr.name.qualified());
                    out.push_str("=\"");
                    escape_attribute(&attr.value, &mut out);
                    out.push('"');
                }
                out.push('>');
                rendered.push(frame);
            }
            XmlEvent::EndElement(name) => {
                if rendered.pop().is_none() {
                    return Err(WssError::xml("unbalanced end element during canonicalization"));
                }
                out.push_str("</");
                out.push_str(&name.qualified());
                out.push('>');
            }
            XmlEvent::Characters(text) => escape_text(text, &mut out),
            XmlEvent::Comment(_) | XmlEvent::StartDocument | XmlEvent::EndDocument => {}
        }
    }

    if !rendered.is_empty() {
        return Err(WssError::xml("unterminated element during canonicalization"));
    }
    Ok(out.into_bytes())
}

/// Canonicalize a tree.
pub fn canonicalize_element(element: &XmlElement) -> WssResult<Vec<u8>> {
    canonicalize(&element.to_events())
}

fn nearest_binding<'a>(rendered: &'a [Vec<Namespace>], prefix: &str) -> Option<&'a str> {
    rendered
        .iter()
        .rev()
        .find_map(|frame| frame.iter().find(|ns| ns.prefix == prefix))
        .map(|ns| ns.uri.as_str())
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
