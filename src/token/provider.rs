//! Token providers registered in the security context.

use super::SecurityToken;
use crate::error::WssResult;
use std::cell::OnceCell;
use std::rc::Rc;

/// Lazily yields the token registered under an id.
pub trait SecurityTokenProvider {
    fn id(&self) -> &str;

    fn get_security_token(&self) -> WssResult<Rc<SecurityToken>>;
}

/// Provider for a token that already exists.
pub struct StaticTokenProvider {
    token: Rc<SecurityToken>,
}

impl StaticTokenProvider {
    pub fn new(token: SecurityToken) -> Self {
        Self { token: Rc::new(token) }
    }

    pub fn from_rc(token: Rc<SecurityToken>) -> Self {
        Self { token }
    }
}

impl SecurityTokenProvider for StaticTokenProvider {
    fn id(&self) -> &str {
        self.token.id()
    }

    fn get_security_token(&self) -> WssResult<Rc<SecurityToken>> {
        Ok(Rc::clone(&self.token))
    }
}

type TokenFactory = Box<dyn Fn() -> WssResult<SecurityToken>>;

/// Provider that builds its token on first request and caches it.
/// A failed build is retried on the next request.
pub struct LazyTokenProvider {
    id: String,
    factory: TokenFactory,
    token: OnceCell<Rc<SecurityToken>>,
}

impl LazyTokenProvider {
    pub fn new(id: impl Into<String>, factory: impl Fn() -> WssResult<SecurityToken> + 'static) -> Self {
        Self {
            id: id.into(),
            factory: Box::new(factory),
            token: OnceCell::new(),
        }
    }
}

impl SecurityTokenProvider for LazyTokenProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_security_token(&self) -> WssResult<Rc<SecurityToken>> {
        if let Some(token) = self.token.get() {
            return Ok(Rc::clone(token));
        }
        let token = Rc::new((self.factory)()?);
        Ok(Rc::clone(self.token.get_or_init(|| token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{KeyMaterial, TokenType};
    use std::cell::Cell;

    #[test]
    fn test_lazy_provider_builds_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let provider = LazyTokenProvider::new("ek-1", move || {
            counter.set(counter.get() + 1);
            Ok(SecurityToken::new("ek-1", TokenType::EncryptedKey, KeyMaterial::Symmetric(vec![0; 16])))
        });

        assert_eq!(calls.get(), 0);
        let a = provider.get_security_token().unwrap();
        let b = provider.get_security_token().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_static_provider_id() {
        let provider = StaticTokenProvider::new(SecurityToken::new("x", TokenType::X509V3, KeyMaterial::None));
        assert_eq!(provider.id(), "x");
    }
}
