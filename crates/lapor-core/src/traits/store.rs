//! Durable key/value property store.

use crate::error::Result;

/// Crash-surviving string key/value store.
///
/// No transactions and no concurrency guarantees: callers serialize
/// read-modify-write sequences themselves (see the scheduler's gate).
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

impl<T: PropertyStore + ?Sized> PropertyStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}
