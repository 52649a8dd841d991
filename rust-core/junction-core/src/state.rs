//! # Application and Request State
//!
//! [`AppState`] is shared by every request and lives behind a lock.
//! [`Values`] is the per-request key/value bag carried by the context; it is
//! owned by a single worker and needs no synchronization.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Slot = Box<dyn Any + Send + Sync>;

/// Thread-safe application state container
///
/// Stores arbitrary typed values that can be shared across handlers.
///
/// ```ignore
/// let state = AppState::new();
/// state.set("app_name", "junction".to_string());
/// let name = ctx.state().get::<String>("app_name");
/// ```
#[derive(Clone, Default)]
pub struct AppState {
    data: Arc<RwLock<HashMap<String, Slot>>>,
}

impl AppState {
    /// Create a new empty state container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value with a string key, replacing any previous value
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.write().insert(key.into(), Box::new(value));
    }

    /// Get a cloned value by key
    ///
    /// Returns `None` if key doesn't exist or type doesn't match.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.read()
            .get(key)
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Check if a key exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Remove a value by key
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Number of stored items
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if state is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.read();
        f.debug_struct("AppState")
            .field("keys", &data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-request values set by middleware and read by handlers
#[derive(Default)]
pub struct Values {
    data: HashMap<String, Slot>,
}

impl Values {
    /// Create an empty bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under `key`
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    /// Borrow a value by key if it exists with type `T`
    #[must_use]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Remove a value by key
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Check if a key exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl std::fmt::Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Values")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_set_get() {
        let state = AppState::new();
        state.set("count", 42i32);
        state.set("name", "test".to_string());

        assert_eq!(state.get::<i32>("count"), Some(42));
        assert_eq!(state.get::<String>("name"), Some("test".to_string()));
    }

    #[test]
    fn test_app_state_type_mismatch() {
        let state = AppState::new();
        state.set("count", 42i32);

        assert_eq!(state.get::<String>("count"), None);
    }

    #[test]
    fn test_app_state_remove_and_len() {
        let state = AppState::new();
        assert!(state.is_empty());

        state.set("a", 1i32);
        state.set("b", 2i32);
        assert_eq!(state.len(), 2);

        assert!(state.remove("a"));
        assert!(!state.contains("a"));
        assert!(!state.remove("a"));
    }

    #[test]
    fn test_app_state_shared_across_threads() {
        let state = AppState::new();
        let state_clone = state.clone();

        std::thread::spawn(move || state_clone.set("thread", 123i32))
            .join()
            .unwrap();
        assert_eq!(state.get::<i32>("thread"), Some(123));
    }

    #[test]
    fn test_values_insert_get() {
        let mut values = Values::new();
        values.insert("user_id", 7u64);

        assert_eq!(values.get::<u64>("user_id"), Some(&7));
        assert_eq!(values.get::<String>("user_id"), None);
        assert!(values.contains("user_id"));
        assert!(values.remove("user_id"));
        assert!(!values.contains("user_id"));
    }
}
