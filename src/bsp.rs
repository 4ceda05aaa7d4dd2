//! Basic Security Profile compliance rules.
//!
//! Violations are collected per structure and reported together, so a
//! message with several problems names all of them.

use crate::error::{ErrorCode, WssError, WssResult};
use glob::Pattern;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// A Basic Security Profile rule checked by the processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BspRule {
    /// EncryptedKey must not carry a Type attribute
    R3209,
    /// EncryptedKey must not carry a MimeType attribute
    R5622,
    /// EncryptedKey must not carry an Encoding attribute
    R5623,
    /// EncryptedKey must not carry a Recipient attribute
    R5602,
    /// EncryptedKey must use RSA-1.5 or RSA-OAEP key transport
    R5621,
    /// KeyInfo of an EncryptedKey must hold exactly one child element
    R5424,
    /// KeyInfo of an EncryptedKey must not use a bare X509Data
    R5426,
    /// EncryptedData must use a permitted block cipher
    R5620,
    /// EncryptedData must carry an EncryptionMethod
    R5601,
    /// Timestamp must contain exactly one Created
    R3203,
    /// Timestamp must not contain more than one Expires
    R3224,
    /// Security header must not contain more than one Timestamp
    R3227,
}

impl BspRule {
    pub fn code(&self) -> &'static str {
        match self {
            Self::R3209 => "R3209",
            Self::R5622 => "R5622",
            Self::R5623 => "R5623",
            Self::R5602 => "R5602",
            Self::R5621 => "R5621",
            Self::R5424 => "R5424",
            Self::R5426 => "R5426",
            Self::R5620 => "R5620",
            Self::R5601 => "R5601",
            Self::R3203 => "R3203",
            Self::R3224 => "R3224",
            Self::R3227 => "R3227",
        }
    }
}

/// Set of violated rules.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("BSP rules violated: {}", .rules.iter().map(BspRule::code).collect::<Vec<_>>().join(", "))]
pub struct BspViolations {
    pub rules: Vec<BspRule>,
}

/// Collects violations, honoring suppressed rules.
#[derive(Debug, Clone)]
pub struct BspEnforcer {
    enabled: bool,
    ignored: Vec<Pattern>,
    violations: Vec<BspRule>,
}

impl BspEnforcer {
    pub fn new(enabled: bool, ignored_rules: &[String]) -> WssResult<Self> {
        let ignored = ignored_rules
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| WssError::config(format!("Invalid BSP rule pattern '{}': {}", p, e)))
            })
            .collect::<WssResult<Vec<_>>>()?;
        Ok(Self {
            enabled,
            ignored,
            violations: Vec::new(),
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ignored: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn is_ignored(&self, rule: BspRule) -> bool {
        !self.enabled || self.ignored.iter().any(|p| p.matches(rule.code()))
    }

    /// Record `rule` as violated.
    pub fn report(&mut self, rule: BspRule) {
        if self.is_ignored(rule) {
            return;
        }
        warn!(rule = rule.code(), "BSP rule violated");
        if !self.violations.contains(&rule) {
            self.violations.push(rule);
        }
    }

    /// Record `rule` when `violated` holds.
    pub fn check(&mut self, violated: bool, rule: BspRule) {
        if violated {
            self.report(rule);
        }
    }

    /// Fail with every rule reported since the last call.
    pub fn finish_structure(&mut self) -> WssResult<()> {
        if self.violations.is_empty() {
            return Ok(());
        }
        let violations = BspViolations {
            rules: std::mem::take(&mut self.violations),
        };
        Err(WssError::with_source(
            ErrorCode::InvalidSecurity,
            violations.to_string(),
            violations,
        ))
    }
}
