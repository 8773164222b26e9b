use crate::error::StoreError;
use crate::item::EmbeddedItem;
use crate::store::ItemStore;

/// Process-local store. Backs `--dry-run` (seeded from the real store's corpus) and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    next_id: u64,
    seeded: usize,
}

#[derive(Debug)]
struct Record {
    page_id: String,
    item: EmbeddedItem,
    archived: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with records read elsewhere; records without a page id get one assigned.
    pub fn from_items(items: Vec<EmbeddedItem>) -> Self {
        let mut store = Self::new();
        for mut item in items {
            let page_id = match item.page_id.clone() {
                Some(id) => id,
                None => store.allocate_id(),
            };
            item.page_id = Some(page_id.clone());
            store.records.push(Record {
                page_id,
                item,
                archived: false,
            });
        }
        store.seeded = store.records.len();
        store
    }

    /// Records written through `insert` since construction.
    pub fn inserted_count(&self) -> usize {
        self.records.len() - self.seeded
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn find_mut(&mut self, page_id: &str) -> Result<&mut Record, StoreError> {
        self.records
            .iter_mut()
            .find(|r| r.page_id == page_id && !r.archived)
            .ok_or_else(|| StoreError::NotFound(page_id.to_string()))
    }
}

impl ItemStore for MemoryStore {
    fn query_all(&self) -> Result<Vec<EmbeddedItem>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| !r.archived)
            .map(|r| r.item.clone())
            .collect())
    }

    fn insert(&mut self, item: &EmbeddedItem) -> Result<String, StoreError> {
        let page_id = self.allocate_id();
        let mut item = item.clone();
        item.page_id = Some(page_id.clone());
        self.records.push(Record {
            page_id: page_id.clone(),
            item,
            archived: false,
        });
        Ok(page_id)
    }

    fn update(&mut self, page_id: &str, item: &EmbeddedItem) -> Result<(), StoreError> {
        let record = self.find_mut(page_id)?;
        let mut item = item.clone();
        item.page_id = Some(page_id.to_string());
        record.item = item;
        Ok(())
    }

    fn archive(&mut self, page_id: &str) -> Result<(), StoreError> {
        self.find_mut(page_id)?.archived = true;
        Ok(())
    }
}
