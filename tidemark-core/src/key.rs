//! Structured cache keys and the filters used to select them.
//!
//! Keys are matched field by field. Nothing here interprets what an entity
//! name or a parameter value means to the application.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter name under which detail keys carry the entity id.
pub const ID_PARAM: &str = "id";

/// Whether a cache entry holds a collection or a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    List,
    Detail,
}

/// Identifier of a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub kind: EntryKind,
    pub entity: String,
    pub params: BTreeMap<String, String>,
}

impl CacheKey {
    /// Key for a collection of `entity` with no parameters.
    pub fn list(namespace: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: EntryKind::List,
            entity: entity.into(),
            params: BTreeMap::new(),
        }
    }

    /// Key for a single `entity` record.
    pub fn detail(
        namespace: impl Into<String>,
        entity: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        let mut params = BTreeMap::new();
        params.insert(ID_PARAM.to_string(), id.into());
        Self {
            namespace: namespace.into(),
            kind: EntryKind::Detail,
            entity: entity.into(),
            params,
        }
    }

    /// Add a parameter (filters, pagination, ...).
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.params.get(ID_PARAM).map(String::as_str)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::List => "list",
            EntryKind::Detail => "detail",
        };
        write!(f, "{}:{}:{}", self.namespace, kind, self.entity)?;
        for (name, value) in &self.params {
            write!(f, ":{}={}", name, value)?;
        }
        Ok(())
    }
}

/// Predicate over cache keys, evaluated by the query store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFilter {
    /// Every entry in the store.
    All,
    /// Entries for `entity`, optionally restricted to one kind.
    Entity {
        entity: String,
        kind: Option<EntryKind>,
    },
    /// Detail entries for one record.
    Detail { entity: String, id: String },
    /// Entries whose namespace or entity equals the tag.
    Tag(String),
}

impl KeyFilter {
    pub fn entity(entity: impl Into<String>) -> Self {
        Self::Entity {
            entity: entity.into(),
            kind: None,
        }
    }

    pub fn lists(entity: impl Into<String>) -> Self {
        Self::Entity {
            entity: entity.into(),
            kind: Some(EntryKind::List),
        }
    }

    pub fn detail(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Detail {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Check whether `key` is selected by this filter.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Entity { entity, kind } => {
                key.entity == *entity && kind.map_or(true, |k| key.kind == k)
            }
            KeyFilter::Detail { entity, id } => {
                key.kind == EntryKind::Detail
                    && key.entity == *entity
                    && key.entity_id() == Some(id.as_str())
            }
            KeyFilter::Tag(tag) => key.namespace == *tag || key.entity == *tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_key_carries_id_param() {
        let key = CacheKey::detail("app", "orders", "o1");
        assert_eq!(key.kind, EntryKind::Detail);
        assert_eq!(key.entity_id(), Some("o1"));
        assert_eq!(key.to_string(), "app:detail:orders:id=o1");
    }

    #[test]
    fn test_list_filter_skips_detail_entries() {
        let filter = KeyFilter::lists("orders");
        assert!(filter.matches(&CacheKey::list("app", "orders").with_param("page", "2")));
        assert!(!filter.matches(&CacheKey::detail("app", "orders", "o1")));
        assert!(!filter.matches(&CacheKey::list("app", "companies")));
    }

    #[test]
    fn test_detail_filter_matches_only_that_id() {
        let filter = KeyFilter::detail("orders", "o1");
        assert!(filter.matches(&CacheKey::detail("app", "orders", "o1")));
        assert!(!filter.matches(&CacheKey::detail("app", "orders", "o2")));
        assert!(!filter.matches(&CacheKey::list("app", "orders")));
    }

    #[test]
    fn test_tag_filter_matches_namespace_or_entity() {
        let filter = KeyFilter::Tag("billing".to_string());
        assert!(filter.matches(&CacheKey::list("billing", "invoices")));
        assert!(filter.matches(&CacheKey::detail("app", "billing", "b1")));
        assert!(!filter.matches(&CacheKey::list("app", "orders")));
    }

    #[test]
    fn test_entity_filter_without_kind_matches_everything_for_entity() {
        let filter = KeyFilter::entity("orders");
        assert!(filter.matches(&CacheKey::list("app", "orders")));
        assert!(filter.matches(&CacheKey::detail("app", "orders", "o9")));
        assert!(KeyFilter::All.matches(&CacheKey::list("x", "y")));
    }
}
