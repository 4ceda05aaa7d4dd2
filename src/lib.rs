//! Streaming WS-Security for Zentinel
//!
//! Verifies, decrypts, signs and encrypts SOAP messages as a stream of XML
//! events, and enforces WS-SecurityPolicy against what was found.
//!
//! # Features
//!
//! - Processor chain with phase and before/after ordering
//! - Inbound: UsernameToken, BinarySecurityToken, Timestamp, XML Signature,
//!   EncryptedKey / EncryptedData, SecurityContextToken and DerivedKeyToken
//! - Outbound: the same structures, applied in the configured order
//! - Basic Security Profile checks with per-rule suppression
//! - WS-SecurityPolicy alternatives, per-operation policies
//! - SOAP Fault response generation
//!
//! # Example
//!
//! ```ignore
//! use zentinel_wssec::{InboundWSSec, SecurityConfig, SecurityProperties};
//! use zentinel_wssec::xml::XmlReader;
//!
//! let properties = SecurityProperties::from_config(SecurityConfig::default())?;
//! let mut stream = InboundWSSec::new(properties)
//!     .process_in_message(XmlReader::from_str(&soap)?, None)?;
//! let events = stream.read_all()?;
//! for event in stream.security_events() {
//!     println!("{}", event.kind());
//! }
//! ```

pub mod agent;
pub mod bsp;
pub mod chain;
pub mod config;
pub mod constants;
pub mod context;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod event;
pub mod inbound;
pub mod outbound;
pub mod policy;
pub mod properties;
pub mod token;
pub mod xml;

pub use agent::WsSecurityAgent;
pub use config::SecurityConfig;
pub use context::SecurityContext;
pub use error::{ErrorCode, WssError, WssResult};
pub use event::{SecurityEvent, SecurityEventListener};
pub use inbound::{InboundOptions, InboundSecurityStream, InboundWSSec};
pub use outbound::{OutboundOptions, OutboundSecurityChain, OutboundWSSec};
pub use policy::{Policy, PolicyEnforcer};
pub use properties::SecurityProperties;
pub use xml::QName;
