//! Tagged constructor registry
//!
//! Implementations that are chosen at runtime (statistics variants, work
//! units) are registered under a short tag and resolved once at startup.

use std::collections::BTreeMap;

use crate::error::{HarnessError, HarnessResult};

/// Map from tag to constructor
pub struct Registry<C> {
    kind: &'static str,
    entries: BTreeMap<&'static str, C>,
}

impl<C> Registry<C> {
    /// Create an empty registry; `kind` names the entries in errors
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register a constructor, replacing any earlier entry with the same tag
    pub fn register(mut self, tag: &'static str, constructor: C) -> Self {
        if self.entries.insert(tag, constructor).is_some() {
            tracing::debug!(kind = self.kind, tag, "Replaced registry entry");
        }
        self
    }

    /// Look up a constructor
    pub fn resolve(&self, tag: &str) -> HarnessResult<&C> {
        self.entries
            .get(tag)
            .ok_or_else(|| HarnessError::UnknownTag {
                kind: self.kind,
                tag: tag.to_string(),
                known: self.tags().join(", "),
            })
    }

    /// Registered tags in sorted order
    pub fn tags(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

impl<C> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_tag() {
        let registry = Registry::<fn() -> u32>::new("number")
            .register("one", || 1)
            .register("two", || 2);

        let ctor = registry.resolve("two").unwrap();
        assert_eq!(ctor(), 2);
        assert_eq!(registry.tags(), vec!["one", "two"]);
    }

    #[test]
    fn test_unknown_tag_lists_known() {
        let registry = Registry::<u8>::new("statistics").register("basic", 0);
        let err = registry.resolve("fancy").unwrap_err();
        match err {
            HarnessError::UnknownTag { kind, tag, known } => {
                assert_eq!(kind, "statistics");
                assert_eq!(tag, "fancy");
                assert_eq!(known, "basic");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
