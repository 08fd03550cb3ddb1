//! Field info cache.
//!
//! The cache remembers whether a field exists, its dimensions and, for
//! plain fields, its value. Its level decides how writes interact with the
//! backing store:
//!
//! | level | reads        | plain writes                         |
//! |-------|--------------|--------------------------------------|
//! | 0     | always miss  | store only                           |
//! | 1     | read-through | store, then cache                    |
//! | 2     | read-through | cache only, until flushed            |

use crate::error::{CoreError, CoreResult};
use crate::path::NodePath;
use pulse_codec::Value;
use std::collections::HashMap;

/// How much a session caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CacheLevel {
    /// No caching.
    #[default]
    Disabled,
    /// Reads are cached; writes go straight to the store.
    ReadThrough,
    /// Plain writes are held in the cache until flushed.
    Deferred,
}

impl CacheLevel {
    /// Integer code, 0 to 2.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::ReadThrough => 1,
            Self::Deferred => 2,
        }
    }

    /// Parses an integer code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for codes other than 0, 1 and 2.
    pub fn from_code(code: i32) -> CoreResult<Self> {
        match code {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::ReadThrough),
            2 => Ok(Self::Deferred),
            other => Err(CoreError::invalid_argument(format!(
                "unknown cache level {other}"
            ))),
        }
    }
}

/// Existence and dimensions of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Whether the field holds data.
    pub exists: bool,
    /// Dimensions of the field's data; empty for scalars.
    pub dims: Vec<usize>,
}

impl FieldInfo {
    /// Info of a field holding `value`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        let dims = match value {
            Value::List(items) => vec![items.len()],
            other => other.shape(),
        };
        Self {
            exists: !value.is_empty(),
            dims,
        }
    }
}

/// Which entries a cache operation touches.
#[derive(Debug, Clone, Copy)]
pub enum CacheScope<'a> {
    /// Every entry.
    All,
    /// Entries of one record and everything below it.
    Under(&'a NodePath),
    /// One field.
    Field(&'a NodePath),
}

impl CacheScope<'_> {
    /// Whether `path` falls in this scope.
    #[must_use]
    pub fn covers(&self, path: &NodePath) -> bool {
        match self {
            Self::All => true,
            Self::Under(root) => path == *root || path.relative_to(root).is_some(),
            Self::Field(field) => path == *field,
        }
    }
}

/// Cache of field info and plain-field data, shared by the sessions of one
/// pulse file.
pub trait InfoCache: Send {
    /// Current level.
    fn level(&self) -> CacheLevel;

    /// Changes the level. Lowering the level drops held entries, so callers
    /// flush first.
    fn set_level(&mut self, level: CacheLevel);

    /// Cached info of a field.
    fn get_info(&self, path: &NodePath) -> Option<FieldInfo>;

    /// Caches info of a field.
    fn put_info(&mut self, path: &NodePath, info: FieldInfo);

    /// Cached info and value of a plain field.
    fn get_info_with_data(&self, path: &NodePath) -> Option<(FieldInfo, Value)>;

    /// Caches the value of a plain field; a `dirty` value has not reached
    /// the store yet.
    fn put_info_with_data(&mut self, path: &NodePath, value: Value, dirty: bool);

    /// Drops entries in `scope`, including unflushed values.
    fn invalidate(&mut self, scope: CacheScope<'_>);

    /// Marks dirty values in `scope` clean and returns them, in path order,
    /// for the caller to write.
    fn flush(&mut self, scope: CacheScope<'_>) -> Vec<(NodePath, Value)>;
}

#[derive(Debug, Clone)]
struct Entry {
    info: FieldInfo,
    data: Option<Value>,
    dirty: bool,
}

/// In-memory [`InfoCache`].
#[derive(Debug, Default)]
pub struct MemoryInfoCache {
    level: CacheLevel,
    entries: HashMap<NodePath, Entry>,
}

impl MemoryInfoCache {
    /// Creates an empty cache at `level`.
    #[must_use]
    pub fn new(level: CacheLevel) -> Self {
        Self {
            level,
            entries: HashMap::new(),
        }
    }

    /// Number of cached fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enabled(&self) -> bool {
        self.level != CacheLevel::Disabled
    }
}

impl InfoCache for MemoryInfoCache {
    fn level(&self) -> CacheLevel {
        self.level
    }

    fn set_level(&mut self, level: CacheLevel) {
        if level == CacheLevel::Disabled {
            self.entries.clear();
        } else if level == CacheLevel::ReadThrough {
            self.entries.retain(|_, entry| !entry.dirty);
        }
        self.level = level;
    }

    fn get_info(&self, path: &NodePath) -> Option<FieldInfo> {
        if !self.enabled() {
            return None;
        }
        self.entries.get(path).map(|entry| entry.info.clone())
    }

    fn put_info(&mut self, path: &NodePath, info: FieldInfo) {
        if !self.enabled() {
            return;
        }
        let entry = self.entries.entry(path.clone()).or_insert(Entry {
            info: info.clone(),
            data: None,
            dirty: false,
        });
        if !entry.dirty {
            entry.info = info;
        }
    }

    fn get_info_with_data(&self, path: &NodePath) -> Option<(FieldInfo, Value)> {
        if !self.enabled() {
            return None;
        }
        let entry = self.entries.get(path)?;
        entry
            .data
            .as_ref()
            .map(|data| (entry.info.clone(), data.clone()))
    }

    fn put_info_with_data(&mut self, path: &NodePath, value: Value, dirty: bool) {
        if !self.enabled() {
            return;
        }
        let dirty = dirty && self.level == CacheLevel::Deferred;
        self.entries.insert(
            path.clone(),
            Entry {
                info: FieldInfo::of(&value),
                data: Some(value),
                dirty,
            },
        );
    }

    fn invalidate(&mut self, scope: CacheScope<'_>) {
        self.entries.retain(|path, _| !scope.covers(path));
    }

    fn flush(&mut self, scope: CacheScope<'_>) -> Vec<(NodePath, Value)> {
        let mut pending: Vec<(NodePath, Value)> = self
            .entries
            .iter_mut()
            .filter(|(path, entry)| entry.dirty && scope.covers(path))
            .filter_map(|(path, entry)| {
                entry.dirty = false;
                entry.data.clone().map(|data| (path.clone(), data))
            })
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> NodePath {
        NodePath::from_encoded(s)
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let mut cache = MemoryInfoCache::new(CacheLevel::Disabled);
        cache.put_info_with_data(&p("a0/b0"), Value::Int(1), false);
        cache.put_info(&p("a0/c0"), FieldInfo::of(&Value::Int(1)));
        assert!(cache.is_empty());
        assert!(cache.get_info(&p("a0/b0")).is_none());
    }

    #[test]
    fn read_through_caches_clean_values() {
        let mut cache = MemoryInfoCache::new(CacheLevel::ReadThrough);
        cache.put_info_with_data(&p("a0/b0"), Value::from(vec![1.0, 2.0]), true);
        let (info, value) = cache.get_info_with_data(&p("a0/b0")).unwrap();
        assert_eq!(info.dims, vec![2]);
        assert_eq!(value, Value::from(vec![1.0, 2.0]));
        // Dirty writes only exist at the deferred level.
        assert!(cache.flush(CacheScope::All).is_empty());
    }

    #[test]
    fn deferred_writes_flush_once() {
        let mut cache = MemoryInfoCache::new(CacheLevel::Deferred);
        cache.put_info_with_data(&p("a0/y0"), Value::Int(2), true);
        cache.put_info_with_data(&p("a0/x0"), Value::Int(1), true);
        cache.put_info_with_data(&p("b0/x0"), Value::Int(3), true);

        let flushed = cache.flush(CacheScope::Under(&p("a0")));
        assert_eq!(
            flushed,
            vec![(p("a0/x0"), Value::Int(1)), (p("a0/y0"), Value::Int(2))]
        );
        assert!(cache.flush(CacheScope::Under(&p("a0"))).is_empty());
        assert_eq!(cache.flush(CacheScope::All).len(), 1);
        // Flushed values stay readable.
        assert!(cache.get_info_with_data(&p("a0/x0")).is_some());
    }

    #[test]
    fn invalidate_by_scope() {
        let mut cache = MemoryInfoCache::new(CacheLevel::ReadThrough);
        for path in ["a0/x0", "a0/y0", "ab0/x0"] {
            cache.put_info_with_data(&p(path), Value::Int(0), false);
        }
        cache.invalidate(CacheScope::Field(&p("a0/x0")));
        assert_eq!(cache.len(), 2);
        cache.invalidate(CacheScope::Under(&p("a0")));
        assert_eq!(cache.len(), 1);
        assert!(cache.get_info(&p("ab0/x0")).is_some());
    }

    #[test]
    fn put_info_keeps_dirty_entries() {
        let mut cache = MemoryInfoCache::new(CacheLevel::Deferred);
        cache.put_info_with_data(&p("a0"), Value::Int(5), true);
        cache.put_info(&p("a0"), FieldInfo { exists: false, dims: vec![] });
        assert!(cache.get_info(&p("a0")).unwrap().exists);
    }

    #[test]
    fn lowering_level_drops_entries() {
        let mut cache = MemoryInfoCache::new(CacheLevel::Deferred);
        cache.put_info_with_data(&p("a0"), Value::Int(5), true);
        cache.put_info_with_data(&p("b0"), Value::Int(6), false);
        cache.set_level(CacheLevel::ReadThrough);
        assert!(cache.get_info(&p("a0")).is_none());
        assert!(cache.get_info(&p("b0")).is_some());
        cache.set_level(CacheLevel::Disabled);
        assert!(cache.is_empty());
    }

    #[test]
    fn level_codes() {
        assert_eq!(CacheLevel::from_code(2).unwrap(), CacheLevel::Deferred);
        assert_eq!(CacheLevel::ReadThrough.code(), 1);
        assert!(CacheLevel::from_code(3).is_err());
    }
}
