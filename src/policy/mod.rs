//! WS-SecurityPolicy: a normalized alternative tree and the enforcer that
//! evaluates it against the security events of a message.

mod enforcer;
mod model;
mod parser;
mod state;

pub use enforcer::PolicyEnforcer;
pub use model::{
    Alternative, Assertion, HeaderPart, PartsAssertion, PasswordRequirement, Policy, ProtectionOrder, TokenAssertion,
    TokenRole,
};
