use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::TokenValidator;
use crate::context::Principal;
use crate::error::AuthError;

/// Fixed set of opaque tokens, each bound to a principal.
///
/// Only SHA-256 digests are kept in memory. Every lookup compares against all
/// entries in constant time so timing does not reveal which entry matched.
#[derive(Default)]
pub struct StaticTokenValidator {
    entries: Vec<(Vec<u8>, Principal)>,
}

impl StaticTokenValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: &str, principal: Principal) -> Self {
        self.insert(token, principal);
        self
    }

    pub fn insert(&mut self, token: &str, principal: Principal) {
        self.entries.push((digest(token), principal));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn digest(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let presented = digest(token);
        let mut found: Option<&Principal> = None;
        for (stored, principal) in &self.entries {
            if bool::from(stored.as_slice().ct_eq(presented.as_slice())) && found.is_none() {
                found = Some(principal);
            }
        }
        found
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_token_maps_to_principal() {
        let v = StaticTokenValidator::new()
            .with_token("alpha", Principal::new("sensor-a"))
            .with_token("bravo", Principal::new("sensor-b").with_scopes(["ingest"]));
        assert_eq!(v.validate("bravo").unwrap().subject, "sensor-b");
        assert!(v.validate("bravo").unwrap().has_scope("ingest"));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let v = StaticTokenValidator::new().with_token("alpha", Principal::new("a"));
        assert!(matches!(v.validate("alph"), Err(AuthError::InvalidToken(_))));
        assert!(matches!(v.validate(""), Err(AuthError::InvalidToken(_))));
    }
}
