//! Error types for WS-Security processing.
//!
//! Every failure surfaces as a [`WssError`] carrying a closed [`ErrorCode`]
//! plus an optional typed cause. Cryptographic failures are collapsed into a
//! single masked error so callers cannot tell unwrap, lookup and decryption
//! failures apart.

use crate::bsp::BspViolations;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used for every masked cryptographic failure.
pub const MASKED_FAILURE_MESSAGE: &str = "The signature or decryption was invalid";

/// Result alias used throughout the crate.
pub type WssResult<T> = Result<T, WssError>;

/// WS-Security fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Generic processing failure
    Failure,
    /// An unsupported token was provided
    UnsupportedSecurityToken,
    /// An unsupported signature or encryption algorithm was used
    UnsupportedAlgorithm,
    /// An error was discovered processing the Security header
    InvalidSecurity,
    /// An invalid security token was provided
    InvalidSecurityToken,
    /// The security token could not be authenticated or authorized
    FailedAuthentication,
    /// The signature or decryption was invalid
    FailedCheck,
    /// Referenced security token could not be retrieved
    SecurityTokenUnavailable,
    /// The message has expired
    MessageExpired,
    /// Outbound encryption could not be performed
    FailedEncryption,
    /// Outbound signature could not be performed
    FailedSignature,
}

impl ErrorCode {
    /// Get the string code for this error.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "FAILURE",
            Self::UnsupportedSecurityToken => "UNSUPPORTED_SECURITY_TOKEN",
            Self::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            Self::InvalidSecurity => "INVALID_SECURITY",
            Self::InvalidSecurityToken => "INVALID_SECURITY_TOKEN",
            Self::FailedAuthentication => "FAILED_AUTHENTICATION",
            Self::FailedCheck => "FAILED_CHECK",
            Self::SecurityTokenUnavailable => "SECURITY_TOKEN_UNAVAILABLE",
            Self::MessageExpired => "MESSAGE_EXPIRED",
            Self::FailedEncryption => "FAILED_ENCRYPTION",
            Self::FailedSignature => "FAILED_SIGNATURE",
        }
    }

    /// SOAP fault code QName (prefixed with `wsse`) for this error.
    pub fn fault_code(&self) -> &'static str {
        match self {
            Self::UnsupportedSecurityToken => "wsse:UnsupportedSecurityToken",
            Self::UnsupportedAlgorithm => "wsse:UnsupportedAlgorithm",
            Self::InvalidSecurity => "wsse:InvalidSecurity",
            Self::InvalidSecurityToken => "wsse:InvalidSecurityToken",
            Self::FailedAuthentication => "wsse:FailedAuthentication",
            Self::FailedCheck => "wsse:FailedCheck",
            Self::SecurityTokenUnavailable => "wsse:SecurityTokenUnavailable",
            Self::MessageExpired => "wsu:MessageExpired",
            Self::Failure | Self::FailedEncryption | Self::FailedSignature => "wsse:InvalidSecurity",
        }
    }
}

/// A policy assertion that was not satisfied.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct PolicyViolation {
    /// Assertion-specific message
    pub message: String,
}

impl PolicyViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lower-level cause attached to a [`WssError`].
#[derive(Error, Debug)]
pub enum ErrorSource {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Bsp(#[from] BspViolations),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Nested(Box<WssError>),
}

/// Security processing error.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct WssError {
    /// Error kind
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Typed cause
    #[source]
    pub source: Option<ErrorSource>,
}

impl WssError {
    /// Create an error without a cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error with a typed cause.
    pub fn with_source(code: ErrorCode, message: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap this error as the cause of a new one.
    pub fn wrap(self, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::with_source(code, message, ErrorSource::Nested(Box::new(self)))
    }

    /// Policy violation surfaced as `InvalidSecurity`.
    pub fn policy(message: impl Into<String>) -> Self {
        let violation = PolicyViolation::new(message);
        Self::with_source(ErrorCode::InvalidSecurity, violation.message.clone(), violation)
    }

    /// The single error shape for all cryptographic failures.
    pub fn masked() -> Self {
        Self::new(ErrorCode::FailedCheck, MASKED_FAILURE_MESSAGE)
    }

    /// Malformed XML input.
    pub fn xml(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_source(
            ErrorCode::InvalidSecurity,
            format!("XML parsing error: {}", message),
            ErrorSource::Xml(message),
        )
    }

    /// Invalid or inconsistent configuration.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Failure, message)
    }

    pub fn invalid_security(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSecurity, message)
    }

    pub fn unsupported_algorithm(algorithm: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedAlgorithm,
            format!("Algorithm {} is not supported", algorithm),
        )
    }

    /// Policy violation carried by this error, if any.
    pub fn policy_violation(&self) -> Option<&PolicyViolation> {
        match &self.source {
            Some(ErrorSource::Policy(v)) => Some(v),
            _ => None,
        }
    }

    /// BSP violations carried by this error, if any.
    pub fn bsp_violations(&self) -> Option<&BspViolations> {
        match &self.source {
            Some(ErrorSource::Bsp(v)) => Some(v),
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for WssError {
    fn from(e: base64::DecodeError) -> Self {
        Self::with_source(ErrorCode::InvalidSecurity, "Invalid base64 content", e)
    }
}

impl From<std::io::Error> for WssError {
    fn from(e: std::io::Error) -> Self {
        Self::with_source(ErrorCode::Failure, format!("IO error: {}", e), e)
    }
}

/// SOAP Fault version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapFaultVersion {
    Soap11,
    Soap12,
}

/// Generate a SOAP Fault response for a security error.
pub fn soap_fault_response(error: &WssError, soap_version: Option<SoapFaultVersion>) -> String {
    match soap_version.unwrap_or(SoapFaultVersion::Soap11) {
        SoapFaultVersion::Soap11 => soap_11_fault(error),
        SoapFaultVersion::Soap12 => soap_12_fault(error),
    }
}

fn soap_11_fault(error: &WssError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:wsse="{wsse}" xmlns:wsu="{wsu}">
  <soap:Body>
    <soap:Fault>
      <faultcode>{code}</faultcode>
      <faultstring>{message}</faultstring>
      <detail>
        <zentinel:error xmlns:zentinel="urn:zentinel:wssec" code="{id}"/>
      </detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        wsse = crate::constants::NS_WSSE10,
        wsu = crate::constants::NS_WSU10,
        code = error.code.fault_code(),
        message = xml_escape(&error.message),
        id = error.code.as_str(),
    )
}

fn soap_12_fault(error: &WssError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsse="{wsse}" xmlns:wsu="{wsu}">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:Sender</soap:Value>
        <soap:Subcode>
          <soap:Value>{code}</soap:Value>
        </soap:Subcode>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{message}</soap:Text>
      </soap:Reason>
      <soap:Detail>
        <zentinel:error xmlns:zentinel="urn:zentinel:wssec" code="{id}"/>
      </soap:Detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        wsse = crate::constants::NS_WSSE10,
        wsu = crate::constants::NS_WSU10,
        code = error.code.fault_code(),
        message = xml_escape(&error.message),
        id = error.code.as_str(),
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
