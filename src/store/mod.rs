pub mod memory;
pub mod notion;

use crate::error::StoreError;
use crate::item::EmbeddedItem;

/// Where embedded items are persisted and read back from.
pub trait ItemStore {
    /// Every stored record. Records whose vector is unreadable come back with `vector: None`.
    fn query_all(&self) -> Result<Vec<EmbeddedItem>, StoreError>;

    /// Persist a new record and return the store-assigned page id.
    fn insert(&mut self, item: &EmbeddedItem) -> Result<String, StoreError>;

    /// Overwrite the properties of an existing record.
    fn update(&mut self, page_id: &str, item: &EmbeddedItem) -> Result<(), StoreError>;

    /// Hide a record from future `query_all` calls.
    fn archive(&mut self, page_id: &str) -> Result<(), StoreError>;
}
