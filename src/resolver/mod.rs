//! Resolver (C4): dotted-path lookup with a per-entity-type attribute index
//! cache, independent across entity types that share an attribute name.

use std::sync::Mutex;

use crate::entity::EntityRef;
use crate::error::{JoshResult, ResolverError};
use crate::sorted_vec_map::SortedVecMap;

/// `(entity, attribute index)`, the unit of work on the scheduler's
/// active-resolution stack (§9 GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub entity: EntityRef,
    pub attribute_index: usize,
}

/// A parsed dotted path such as `current.height`, `prior.JoshuaTrees.count`,
/// or `here.Precipitation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub root: ScopeRoot,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRoot {
    Current,
    Prior,
    Here,
    Meta,
}

impl Path {
    pub fn parse(s: &str) -> JoshResult<Path> {
        let mut parts = s.split('.');
        let root = match parts.next() {
            Some("current") => ScopeRoot::Current,
            Some("prior") => ScopeRoot::Prior,
            Some("here") => ScopeRoot::Here,
            Some("meta") => ScopeRoot::Meta,
            Some(other) => return Err(ResolverError::UnknownScope(other.to_string()).into()),
            None => return Err(ResolverError::EmptyPath.into()),
        };
        let segments: Vec<String> = parts.map(str::to_string).collect();
        if segments.is_empty() {
            return Err(ResolverError::EmptyPath.into());
        }
        Ok(Path { root, segments })
    }
}

/// Caches `(entity-type identity, attribute name) -> index` so repeated
/// resolution of the same path against instances of the same type avoids a
/// string hash (§4.4). Distinct entity types sharing an attribute name are
/// cached independently by keying on type identity, not name alone.
#[derive(Default)]
pub struct AttributeIndexCache {
    cache: Mutex<SortedVecMap<(usize, String), usize>>,
}

impl AttributeIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `type_id` should be a stable identity for the entity type (e.g. the
    /// descriptor's address or an assigned type-id integer), not its name.
    pub fn index_for(&self, type_id: usize, attribute: &str, lookup: impl FnOnce() -> Option<usize>) -> Option<usize> {
        let key = (type_id, attribute.to_string());
        if let Some(idx) = self.cache.lock().expect("cache mutex poisoned").get(&key) {
            return Some(*idx);
        }
        let idx = lookup()?;
        self.cache.lock().expect("cache mutex poisoned").insert(key, idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        let p = Path::parse("current.height").unwrap();
        assert_eq!(p.root, ScopeRoot::Current);
        assert_eq!(p.segments, vec!["height".to_string()]);

        let p = Path::parse("prior.JoshuaTrees.count").unwrap();
        assert_eq!(p.root, ScopeRoot::Prior);
        assert_eq!(p.segments, vec!["JoshuaTrees".to_string(), "count".to_string()]);
    }

    #[test]
    fn unknown_scope_root_is_an_error() {
        assert!(Path::parse("future.x").is_err());
    }

    #[test]
    fn distinct_entity_types_cache_independently() {
        let cache = AttributeIndexCache::new();
        let tree_type = 1usize;
        let patch_type = 2usize;
        let tree_idx = cache.index_for(tree_type, "height", || Some(3)).unwrap();
        let patch_idx = cache.index_for(patch_type, "height", || Some(7)).unwrap();
        assert_eq!(tree_idx, 3);
        assert_eq!(patch_idx, 7);
        // Second lookup must hit the cache and return the same per-type value,
        // proving no cross-pollination between types sharing the attribute name.
        assert_eq!(cache.index_for(tree_type, "height", || panic!("should be cached")), Some(3));
        assert_eq!(cache.index_for(patch_type, "height", || panic!("should be cached")), Some(7));
    }
}
