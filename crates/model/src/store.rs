use serde_json::Value;

use crate::{ObjectRef, StoreError};

/// Transactional object store.
pub trait Store: Send + Sync {
    /// Open a named transaction. Names identify the work in logs and stats.
    fn begin(&self, name: &str) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One open transaction, owned by a single worker at a time.
///
/// Writes stay pending until [`commit`](StoreTransaction::commit); a write/write
/// conflict with a concurrently committed transaction surfaces as
/// [`StoreError::Conflict`].
pub trait StoreTransaction: Send {
    fn name(&self) -> &str;

    fn get(&self, object: &ObjectRef, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&mut self, object: &ObjectRef, key: &str, value: Value) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard pending writes.
    fn abort(&mut self);

    /// Release any store connections held for this transaction.
    fn close_connections(&mut self);
}
