//! Cancellation keys
//!
//! A key is any caller-chosen value with equality and a stable hash. Keys of
//! different concrete types never compare equal, so `"fact"` and
//! `String::from("fact")` name different families of effects.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe view of a key value
trait KeyValue: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn eq_key(&self, other: &dyn KeyValue) -> bool;
    fn hash_key(&self, state: &mut dyn Hasher);
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> KeyValue for T
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_key(&self, other: &dyn KeyValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_key(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies a family of effects that are cancelled together
#[derive(Clone)]
pub struct CancelKey(Arc<dyn KeyValue>);

impl CancelKey {
    /// Wrap a value as a cancellation key
    ///
    /// Passing an existing `CancelKey` returns it unchanged.
    pub fn new<K>(value: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        if let Some(key) = (&value as &dyn Any).downcast_ref::<CancelKey>() {
            return key.clone();
        }
        Self(Arc::new(value))
    }

    /// Borrow the wrapped value if it has type `K`
    pub fn downcast_ref<K: 'static>(&self) -> Option<&K> {
        self.0.as_any().downcast_ref::<K>()
    }
}

impl PartialEq for CancelKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.eq_key(other.0.as_ref())
    }
}

impl Eq for CancelKey {}

impl Hash for CancelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_key(state);
    }
}

impl fmt::Debug for CancelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_key(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &CancelKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_same_value_is_equal() {
        let a = CancelKey::new("fact");
        let b = CancelKey::new("fact");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_different_types_never_equal() {
        let a = CancelKey::new("fact");
        let b = CancelKey::new(String::from("fact"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_rewrapping_is_identity() {
        let a = CancelKey::new(7u32);
        let b = CancelKey::new(a.clone());
        assert_eq!(a, b);
        assert_eq!(b.downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_enum_keys() {
        #[derive(Debug, PartialEq, Eq, Hash)]
        enum Id {
            Timer,
            Search,
        }

        assert_eq!(CancelKey::new(Id::Timer), CancelKey::new(Id::Timer));
        assert_ne!(CancelKey::new(Id::Timer), CancelKey::new(Id::Search));
        assert_eq!(format!("{:?}", CancelKey::new(Id::Search)), "Search");
    }
}
