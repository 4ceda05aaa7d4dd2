//! Owned XML events exchanged between processors.

use crate::constants::{ATT_NULL_ID, ATT_WSU_ID};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Namespace-qualified name.
///
/// Equality and hashing consider only the namespace URI and the local part;
/// the prefix is carried for serialization.
#[derive(Debug, Clone)]
pub struct QName {
    namespace: Cow<'static, str>,
    local: Cow<'static, str>,
    prefix: Cow<'static, str>,
}

impl QName {
    /// Compile-time constant name.
    pub const fn constant(namespace: &'static str, local: &'static str, prefix: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(namespace),
            local: Cow::Borrowed(local),
            prefix: Cow::Borrowed(prefix),
        }
    }

    /// Unprefixed name.
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self::with_prefix(namespace, local, "")
    }

    pub fn with_prefix(
        namespace: impl Into<String>,
        local: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Cow::Owned(namespace.into()),
            local: Cow::Owned(local.into()),
            prefix: Cow::Owned(prefix.into()),
        }
    }

    /// Name without a namespace.
    pub fn local_only(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Same name bound to a different prefix.
    pub fn prefixed(&self, prefix: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace.clone(),
            local: self.local.clone(),
            prefix: Cow::Owned(prefix.into()),
        }
    }

    /// `prefix:local`, or `local` when unprefixed.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.to_string()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    /// Parse `{namespace}local` or a bare local name.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
            Some((ns, local)) => Self::new(ns, local),
            None => Self::local_only(s),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Render an element path as `/{ns}a/{ns}b`.
pub fn path_to_string(path: &[QName]) -> String {
    path.iter().map(|q| format!("/{}", q)).collect()
}

/// Attribute of a start element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Namespace declaration (`xmlns` / `xmlns:prefix`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Empty for the default namespace
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// Start tag with its attributes and namespace declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<Namespace>,
}

impl StartElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Start tag that declares the namespace of its own prefix.
    pub fn declaring(name: QName) -> Self {
        let mut start = Self::new(name);
        let (prefix, uri) = (start.name.prefix().to_string(), start.name.namespace().to_string());
        if !uri.is_empty() {
            start.ensure_namespace(prefix, uri);
        }
        start
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.ensure_namespace(prefix, uri);
        self
    }

    /// Set an attribute, declaring its prefix on this element when needed.
    pub fn set_attribute(&mut self, name: QName, value: impl Into<String>) {
        if !name.namespace().is_empty() && !name.prefix().is_empty() && name.prefix() != "xml" {
            let (prefix, uri) = (name.prefix().to_string(), name.namespace().to_string());
            self.ensure_namespace(prefix, uri);
        }
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    /// Declare `prefix` unless this element already declares it.
    pub fn ensure_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        if !self.namespaces.iter().any(|ns| ns.prefix == prefix) {
            self.namespaces.push(Namespace::new(prefix, uri));
        }
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    /// `wsu:Id`, falling back to an unqualified `Id`.
    pub fn id(&self) -> Option<&str> {
        self.attribute(&ATT_WSU_ID)
            .or_else(|| self.attribute(&ATT_NULL_ID))
    }
}

/// A single XML parse event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartDocument,
    StartElement(StartElement),
    EndElement(QName),
    Characters(String),
    Comment(String),
    EndDocument,
}

impl XmlEvent {
    pub fn start(start: StartElement) -> Self {
        Self::StartElement(start)
    }

    pub fn end(name: QName) -> Self {
        Self::EndElement(name)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Characters(text.into())
    }

    pub fn as_start_element(&self) -> Option<&StartElement> {
        match self {
            Self::StartElement(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_start_of(&self, name: &QName) -> bool {
        matches!(self, Self::StartElement(s) if &s.name == name)
    }

    pub fn is_end_of(&self, name: &QName) -> bool {
        matches!(self, Self::EndElement(n) if n == name)
    }
}
