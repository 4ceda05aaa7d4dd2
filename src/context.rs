//! Per-message state: the security context shared by all processors and
//! the document context each processor position keeps.

use crate::constants::{is_header, TAG_WSSE_SECURITY};
use crate::error::{ErrorCode, WssError, WssResult};
use crate::event::{SecurityEvent, SecurityEventListener};
use crate::token::{SecurityToken, SecurityTokenProvider};
use crate::xml::{Namespace, QName, XmlEvent};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::debug;

/// Typed key into the [`SecurityContext`] store.
pub struct ContextKey<T: 'static> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for ContextKey<T> {}

/// Well-known context keys.
pub mod keys {
    use super::ContextKey;
    use crate::event::ProtectionAction;
    use crate::xml::QName;

    pub const USE_THIS_TOKEN_ID_FOR_SIGNATURE: ContextKey<String> =
        ContextKey::new("use_this_token_id_for_signature");
    pub const USE_THIS_TOKEN_ID_FOR_ENCRYPTION: ContextKey<String> =
        ContextKey::new("use_this_token_id_for_encryption");
    pub const USE_THIS_TOKEN_ID_FOR_DERIVED_KEY: ContextKey<String> =
        ContextKey::new("use_this_token_id_for_derived_key");
    pub const USE_THIS_TOKEN_ID_FOR_SECURITY_CONTEXT_TOKEN: ContextKey<String> =
        ContextKey::new("use_this_token_id_for_security_context_token");

    /// Element paths covered by a verified signature reference
    pub const SIGNED_PATHS: ContextKey<Vec<Vec<QName>>> = ContextKey::new("signed_paths");
    /// Element paths whose element or content was decrypted
    pub const ENCRYPTED_PATHS: ContextKey<Vec<Vec<QName>>> = ContextKey::new("encrypted_paths");
    /// Ids named by a reference of a verified `SignedInfo`, digested or not
    pub const SIGNED_REFERENCE_IDS: ContextKey<Vec<String>> = ContextKey::new("signed_reference_ids");
    /// Protection structures in security header order
    pub const PROTECTION_ORDER: ContextKey<Vec<ProtectionAction>> = ContextKey::new("protection_order");
    /// SignatureValue of every verified or produced signature
    pub const SIGNATURE_VALUES: ContextKey<Vec<String>> = ContextKey::new("signature_values");
    /// Values of received SignatureConfirmation elements
    pub const SIGNATURE_CONFIRMATIONS: ContextKey<Vec<Option<String>>> =
        ContextKey::new("signature_confirmations");
    /// UsernameToken user that authenticated
    pub const AUTHENTICATED_USER: ContextKey<String> = ContextKey::new("authenticated_user");
    /// SOAP envelope namespace of the message
    pub const SOAP_NAMESPACE: ContextKey<String> = ContextKey::new("soap_namespace");
}

/// Message-scoped key/value store and token registry.
#[derive(Default)]
pub struct SecurityContext {
    values: HashMap<&'static str, Box<dyn Any>>,
    providers: HashMap<String, Rc<dyn SecurityTokenProvider>>,
    events: Vec<SecurityEvent>,
    listener: Option<Box<dyn SecurityEventListener>>,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: Box<dyn SecurityEventListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::default()
        }
    }

    pub fn put<T: 'static>(&mut self, key: ContextKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    pub fn get<T: 'static>(&self, key: ContextKey<T>) -> Option<&T> {
        self.values.get(key.name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: ContextKey<T>) -> Option<&mut T> {
        self.values.get_mut(key.name).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: 'static>(&mut self, key: ContextKey<T>) -> Option<T> {
        let value = self.values.remove(key.name)?;
        value.downcast::<T>().ok().map(|b| *b)
    }

    /// Append to a list value, creating it on first use.
    pub fn push<T: 'static>(&mut self, key: ContextKey<Vec<T>>, item: T) {
        let entry = self
            .values
            .entry(key.name)
            .or_insert_with(|| Box::new(Vec::<T>::new()));
        if let Some(list) = entry.downcast_mut::<Vec<T>>() {
            list.push(item);
        }
    }

    /// List value, empty when never set.
    pub fn list<T: 'static>(&self, key: ContextKey<Vec<T>>) -> &[T] {
        self.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register `provider` under `id`. A later registration replaces an
    /// earlier one.
    pub fn register_security_token_provider(&mut self, id: impl Into<String>, provider: Rc<dyn SecurityTokenProvider>) {
        let id = id.into();
        if self.providers.insert(id.clone(), provider).is_some() {
            debug!(token_id = %id, "Replaced security token provider");
        } else {
            debug!(token_id = %id, "Registered security token provider");
        }
    }

    pub fn security_token_provider(&self, id: &str) -> Option<Rc<dyn SecurityTokenProvider>> {
        self.providers.get(id).cloned()
    }

    /// Registered provider ids.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Resolve the token registered under `id`.
    pub fn security_token(&self, id: &str) -> WssResult<Rc<SecurityToken>> {
        self.security_token_provider(id)
            .ok_or_else(|| {
                WssError::new(
                    ErrorCode::SecurityTokenUnavailable,
                    format!("Referenced security token {} could not be retrieved", id),
                )
            })?
            .get_security_token()
    }

    /// Record an event and forward it to the listener.
    pub fn register_security_event(&mut self, event: SecurityEvent) -> WssResult<()> {
        debug!(event = event.kind(), "Security event");
        if let Some(listener) = self.listener.as_mut() {
            listener.register_security_event(&event)?;
        }
        self.events.push(event);
        Ok(())
    }

    pub fn security_events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn take_security_events(&mut self) -> Vec<SecurityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Tell the listener the message is complete.
    pub fn finish_listener(&mut self) -> WssResult<()> {
        match self.listener.as_mut() {
            Some(listener) => listener.finish(),
            None => Ok(()),
        }
    }

    pub fn take_listener(&mut self) -> Option<Box<dyn SecurityEventListener>> {
        self.listener.take()
    }
}

/// Position in the document as seen by one processor.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    path: Vec<QName>,
    namespaces: Vec<Vec<Namespace>>,
    pending_pop: bool,
    encoding: String,
}

impl Default for DocumentContext {
    fn default() -> Self {
        Self {
            path: Vec::new(),
            namespaces: Vec::new(),
            pending_pop: false,
            encoding: "UTF-8".to_string(),
        }
    }
}

impl DocumentContext {
    /// Advance past `event`. The path of an end element still contains
    /// that element; it is popped when the next event arrives.
    pub fn observe(&mut self, event: &XmlEvent) {
        if self.pending_pop {
            self.path.pop();
            self.namespaces.pop();
            self.pending_pop = false;
        }
        match event {
            XmlEvent::StartElement(start) => {
                self.path.push(start.name.clone());
                self.namespaces.push(start.namespaces.clone());
            }
            XmlEvent::EndElement(_) => self.pending_pop = true,
            _ => {}
        }
    }

    pub fn path(&self) -> &[QName] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Whether the current event lies within `Envelope/Header/Security`.
    pub fn in_security_header(&self) -> bool {
        self.path.len() >= 3 && is_header(&self.path[1]) && self.path[2] == TAG_WSSE_SECURITY
    }

    /// Whether the current event is the `Security` header element itself.
    pub fn at_security_header(&self) -> bool {
        self.path.len() == 3 && self.in_security_header()
    }

    /// Effective bindings of the enclosing elements, excluding the current
    /// element's own declarations. Inner declarations win.
    pub fn parent_namespaces(&self) -> Vec<Namespace> {
        let frames = match self.namespaces.len() {
            0 => &self.namespaces[..],
            n => &self.namespaces[..n - 1],
        };
        let mut effective: Vec<Namespace> = Vec::new();
        for frame in frames.iter().rev() {
            for ns in frame {
                if !effective.iter().any(|e| e.prefix == ns.prefix) {
                    effective.push(ns.clone());
                }
            }
        }
        effective
    }
}
