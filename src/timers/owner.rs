//! Owner resolution.
//!
//! Callers identify the device or satellite a timer belongs to by whatever
//! id they have at hand; an [`OwnerResolver`] maps that onto the canonical
//! owner string stored on the record.

use std::collections::HashMap;

/// Maps a caller-supplied id onto a canonical owner.
pub trait OwnerResolver: Send + Sync {
    /// Returns `None` when the id does not name a known owner.
    fn resolve_owner(&self, id: &str) -> Option<String>;
}

impl<F> OwnerResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve_owner(&self, id: &str) -> Option<String> {
        self(id)
    }
}

/// Resolver backed by a fixed alias table.
///
/// An id resolves when it is either an alias key or one of the canonical
/// owners. With `accept_unknown` set, any non-empty id resolves to itself.
#[derive(Debug, Clone, Default)]
pub struct StaticOwnerResolver {
    aliases: HashMap<String, String>,
    accept_unknown: bool,
}

impl StaticOwnerResolver {
    /// Resolver that only accepts ids present in `aliases`.
    #[must_use]
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self {
            aliases,
            accept_unknown: false,
        }
    }

    /// Resolver that accepts any non-empty id as its own owner.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            aliases: HashMap::new(),
            accept_unknown: true,
        }
    }

    /// Also accept ids outside the alias table.
    #[must_use]
    pub fn accept_unknown(mut self, accept: bool) -> Self {
        self.accept_unknown = accept;
        self
    }
}

impl OwnerResolver for StaticOwnerResolver {
    fn resolve_owner(&self, id: &str) -> Option<String> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        if let Some(owner) = self.aliases.get(id) {
            return Some(owner.clone());
        }
        if self.accept_unknown || self.aliases.values().any(|owner| owner == id) {
            return Some(id.to_owned());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn alias_table_resolves_keys_and_owners() {
        let resolver = StaticOwnerResolver::new(HashMap::from([(
            "dev-1".to_owned(),
            "kitchen".to_owned(),
        )]));
        assert_eq!(resolver.resolve_owner("dev-1").as_deref(), Some("kitchen"));
        assert_eq!(resolver.resolve_owner("kitchen").as_deref(), Some("kitchen"));
        assert_eq!(resolver.resolve_owner("garage"), None);
        assert_eq!(resolver.resolve_owner("  "), None);
    }

    #[test]
    fn permissive_resolver_accepts_any_id() {
        let resolver = StaticOwnerResolver::permissive();
        assert_eq!(resolver.resolve_owner("garage").as_deref(), Some("garage"));
        assert_eq!(resolver.resolve_owner(""), None);
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |id: &str| (id == "ok").then(|| "owner".to_owned());
        assert_eq!(resolver.resolve_owner("ok").as_deref(), Some("owner"));
        assert_eq!(resolver.resolve_owner("nope"), None);
    }
}
