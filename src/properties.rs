//! Immutable per-configuration state shared by every message.

use crate::bsp::BspEnforcer;
use crate::config::SecurityConfig;
use crate::credentials::{CredentialResolver, MemoryCredentialStore, MemoryPasswordCallback, PasswordCallback};
use crate::crypto::AlgorithmSuite;
use crate::error::{WssError, WssResult};
use std::sync::Arc;

/// Configuration plus the collaborators the processors call into.
/// Read-only while messages are processed, so it can be shared across
/// threads.
#[derive(Clone)]
pub struct SecurityProperties {
    pub config: SecurityConfig,
    pub credentials: Arc<dyn CredentialResolver>,
    pub callback: Arc<dyn PasswordCallback>,
    pub algorithm_suite: Option<AlgorithmSuite>,
}

impl SecurityProperties {
    pub fn new(
        config: SecurityConfig,
        credentials: Arc<dyn CredentialResolver>,
        callback: Arc<dyn PasswordCallback>,
    ) -> WssResult<Self> {
        let algorithm_suite = match &config.algorithm_suite {
            Some(name) => Some(
                AlgorithmSuite::named(name)
                    .ok_or_else(|| WssError::config(format!("Unknown algorithm suite '{}'", name)))?,
            ),
            None => None,
        };
        // Validate the patterns up front
        BspEnforcer::new(config.bsp.enabled, &config.bsp.ignored_rules)?;
        Ok(Self {
            config,
            credentials,
            callback,
            algorithm_suite,
        })
    }

    /// Properties backed by the in-memory stores described in the config.
    pub fn from_config(config: SecurityConfig) -> WssResult<Self> {
        let credentials = MemoryCredentialStore::from_config(&config.credentials)?;
        let callback = MemoryPasswordCallback::from_config(&config.credentials)?;
        Self::new(config, Arc::new(credentials), Arc::new(callback))
    }

    /// Fresh BSP collector for one message.
    pub fn bsp_enforcer(&self) -> BspEnforcer {
        BspEnforcer::new(self.config.bsp.enabled, &self.config.bsp.ignored_rules)
            .unwrap_or_else(|_| BspEnforcer::disabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_suite_rejected() {
        let mut config = SecurityConfig::default();
        config.algorithm_suite = Some("Basic999".into());
        assert!(SecurityProperties::from_config(config).is_err());
    }

    #[test]
    fn test_invalid_bsp_pattern_rejected() {
        let mut config = SecurityConfig::default();
        config.bsp.ignored_rules = vec!["R[".into()];
        assert!(SecurityProperties::from_config(config).is_err());
    }

    #[test]
    fn test_named_suite_loaded() {
        let mut config = SecurityConfig::default();
        config.algorithm_suite = Some("Basic128".into());
        let properties = SecurityProperties::from_config(config).unwrap();
        assert_eq!(properties.algorithm_suite.unwrap().name, "Basic128");
    }
}
