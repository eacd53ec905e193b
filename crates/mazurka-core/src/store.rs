//! A container of type-keyed values.
//!
//! Each type may be stored at most once. The server scaffold uses one
//! as its services registry; request and response views carry one for
//! arbitrary per-request and per-session data.

use std::any::{Any, TypeId};
use std::collections::HashMap;

#[derive(Default)]
pub struct TypeStore {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl TypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> &mut T {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
        self.get_mut::<T>().unwrap()
    }

    pub fn find<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    /// Fetch a stored `T`, or store and return its default.
    pub fn get_or_default<T: Any + Send + Sync + Default + Clone>(&self) -> T {
        self.find::<T>().cloned().unwrap_or_default()
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for TypeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeStore")
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn insert_find_remove() {
        let mut store = TypeStore::new();
        assert!(store.find::<Counter>().is_none());
        store.insert(Counter(1));
        assert_eq!(store.find::<Counter>(), Some(&Counter(1)));
        store.get_mut::<Counter>().unwrap().0 = 2;
        assert_eq!(store.remove::<Counter>(), Some(Counter(2)));
        assert!(store.is_empty());
    }

    #[test]
    fn one_value_per_type() {
        let mut store = TypeStore::new();
        store.insert(Counter(1));
        store.insert(Counter(5));
        assert_eq!(store.find::<Counter>(), Some(&Counter(5)));
    }
}
