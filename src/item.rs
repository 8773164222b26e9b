use chrono::{DateTime, SecondsFormat, Utc};

/// A message as delivered by the mail source, body already decoded to text.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// ISO-8601.
    pub timestamp: String,
    pub body: String,
}

/// An item with its embedding attached.
///
/// Records read back from the store may have lost their vector (empty or
/// unparseable property); those carry `vector: None` and are never compared.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedItem {
    pub item: Item,
    pub vector: Option<Vec<f32>>,
    /// ISO-8601 time the vector was computed.
    pub embedded_at: Option<String>,
    /// Store-assigned id, present once the record has been persisted.
    pub page_id: Option<String>,
}

impl EmbeddedItem {
    /// Attach a freshly computed vector, stamping `embedded_at` with the current time.
    pub fn new(item: Item, vector: Vec<f32>) -> Self {
        Self {
            item,
            vector: Some(vector),
            embedded_at: Some(now_iso()),
            page_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn subject(&self) -> &str {
        &self.item.subject
    }
}

pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_embedded_at() {
        let item = Item {
            id: "m1".into(),
            subject: "Hello".into(),
            sender: "a@example.com".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            body: "Body".into(),
        };
        let e = EmbeddedItem::new(item, vec![1.0, 0.0]);
        assert_eq!(e.id(), "m1");
        assert!(e.page_id.is_none());
        let stamped = e.embedded_at.as_deref().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamped).is_ok());
    }

    #[test]
    fn test_to_iso_format() {
        let ts = DateTime::parse_from_rfc3339("2024-03-05T10:20:30+02:00").unwrap().with_timezone(&Utc);
        assert_eq!(to_iso(ts), "2024-03-05T08:20:30Z");
    }
}
