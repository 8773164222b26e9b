pub mod gmail;

use crate::error::FetchError;
use crate::item::Item;

/// Where items come from.
pub trait MailSource {
    /// Ids of every message matching `query`, in provider order.
    fn list_item_ids(&self, query: &str) -> Result<Vec<String>, FetchError>;

    /// Fetch one message with its body decoded to plain UTF-8 text.
    fn fetch_item(&self, id: &str) -> Result<Item, FetchError>;
}
