//! Policy enforcement over the security event stream.

use super::model::Policy;
use super::state::{AlternativeState, Stage};
use crate::error::{WssError, WssResult};
use crate::event::{SecurityEvent, SecurityEventListener};
use crate::xml::QName;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Matches security events against the alternatives of a policy.
///
/// Events up to the `Operation` event are queued. The operation selects its
/// own policy, or the default one, and the queued events are replayed in
/// order. Alternatives that can no longer be satisfied are dropped; once
/// none is left the enforcer fails with the first unmet assertion of the
/// alternative that came closest.
#[derive(Debug)]
pub struct PolicyEnforcer {
    default_policy: Policy,
    operation_policies: HashMap<QName, Policy>,
    queued: Vec<SecurityEvent>,
    alternatives: Option<Vec<AlternativeState>>,
    operation: Option<QName>,
    finished: bool,
}

impl PolicyEnforcer {
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            operation_policies: HashMap::new(),
            queued: Vec::new(),
            alternatives: None,
            operation: None,
            finished: false,
        }
    }

    /// Use `policy` instead of the default one for `operation`.
    pub fn with_operation_policy(mut self, operation: QName, policy: Policy) -> Self {
        self.operation_policies.insert(operation, policy);
        self
    }

    /// Operation the message was identified as, once known.
    pub fn operation(&self) -> Option<&QName> {
        self.operation.as_ref()
    }

    pub fn register_security_event(&mut self, event: &SecurityEvent) -> WssResult<()> {
        if self.alternatives.is_none() {
            if let SecurityEvent::Operation { name } = event {
                self.operation = Some(name.clone());
                self.start(Some(name))?;
                return self.verify(Stage::Operation);
            }
            self.queued.push(event.clone());
            return Ok(());
        }
        self.dispatch(event)
    }

    /// Require a satisfied alternative for the complete message.
    pub fn do_final(&mut self) -> WssResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.alternatives.is_none() {
            self.start(None)?;
        }
        self.verify(Stage::Final)?;
        debug!(operation = ?self.operation.as_ref().map(ToString::to_string), "Policy satisfied");
        Ok(())
    }

    /// Select the policy and replay the queued events against it.
    fn start(&mut self, operation: Option<&QName>) -> WssResult<()> {
        let policy = operation
            .and_then(|name| self.operation_policies.get(name))
            .unwrap_or(&self.default_policy);
        debug!(
            operation = ?operation.map(ToString::to_string),
            alternatives = policy.alternatives().len(),
            "Policy selected"
        );
        self.alternatives = Some(
            policy
                .alternatives()
                .iter()
                .enumerate()
                .map(|(index, alternative)| AlternativeState::new(index, alternative))
                .collect(),
        );
        for event in std::mem::take(&mut self.queued) {
            self.dispatch(&event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &SecurityEvent) -> WssResult<()> {
        let alternatives = self.alternatives.get_or_insert_with(Vec::new);
        let mut remaining = 0;
        for alternative in alternatives.iter_mut().filter(|a| !a.is_failed()) {
            if alternative.register(event) {
                remaining += 1;
            } else {
                debug!(alternative = alternative.index(), event = event.kind(), "Policy alternative dropped");
            }
        }
        if remaining == 0 {
            return Err(self.violation(Stage::Operation));
        }
        Ok(())
    }

    fn verify(&mut self, stage: Stage) -> WssResult<()> {
        let alternatives = self.alternatives.get_or_insert_with(Vec::new);
        let mut remaining = 0;
        for alternative in alternatives.iter_mut() {
            if alternative.verify(stage) {
                remaining += 1;
            }
        }
        if remaining == 0 {
            return Err(self.violation(stage));
        }
        Ok(())
    }

    /// Error naming the first unmet assertion of the alternative with the
    /// fewest unmet assertions; ties go to the one declared first.
    fn violation(&self, stage: Stage) -> WssError {
        let message = self
            .alternatives
            .iter()
            .flatten()
            .map(|alternative| alternative.unmet(stage).collect::<Vec<_>>())
            .min_by_key(Vec::len)
            .and_then(|unmet| unmet.into_iter().next())
            .unwrap_or_else(|| "No policy alternative could be satisfied".to_string());
        warn!(violation = %message, "Policy violated");
        WssError::policy(message)
    }
}

impl SecurityEventListener for PolicyEnforcer {
    fn register_security_event(&mut self, event: &SecurityEvent) -> WssResult<()> {
        PolicyEnforcer::register_security_event(self, event)
    }

    fn finish(&mut self) -> WssResult<()> {
        self.do_final()
    }
}
