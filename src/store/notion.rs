// notion.rs - Notion database as the item store.
//
// One page per message. Long text (body, serialized vector) is split across rich_text
// segments because Notion caps each segment at 2000 chars; reads concatenate them back.

use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use serde_json::{json, Map, Value};

use crate::config;
use crate::config::notion::{
    PROP_CONTENT, PROP_DATE, PROP_FROM, PROP_MESSAGE_ID, PROP_SUBJECT, PROP_VECTOR, PROP_VECTORIZED_AT,
};
use crate::error::{store_error_from_ureq, StoreError};
use crate::item::{EmbeddedItem, Item};
use crate::logging::truncate_for_log;
use crate::store::ItemStore;

pub struct NotionStore {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    database_id: String,
}

impl NotionStore {
    pub fn new(api_key: String, database_id: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config::http::REQUEST_TIMEOUT_SECS))
            .build();
        Self {
            agent,
            api_base: config::notion::API_BASE.to_string(),
            api_key,
            database_id,
        }
    }

    fn send(&self, method: &str, path: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}/{}", self.api_base, path);
        let resp = self
            .agent
            .request(method, &url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Notion-Version", config::notion::API_VERSION)
            .set("Content-Type", "application/json")
            .send_string(&body.to_string())
            .map_err(store_error_from_ureq)?;
        let text = resp.into_string().map_err(|e| StoreError::Http(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| StoreError::Http(format!("invalid JSON from Notion: {e}")))
    }
}

impl ItemStore for NotionStore {
    fn query_all(&self) -> Result<Vec<EmbeddedItem>, StoreError> {
        let path = format!("databases/{}/query", self.database_id);
        let out = collect_query_pages(|cursor| {
            let mut body = json!({ "page_size": config::notion::QUERY_PAGE_SIZE });
            if let Some(c) = cursor {
                body["start_cursor"] = json!(c);
            }
            self.send("POST", &path, &body)
        })?;

        log::info!("Loaded {} pages from Notion database", out.len());
        Ok(out)
    }

    fn insert(&mut self, item: &EmbeddedItem) -> Result<String, StoreError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": item_properties(item),
        });
        let resp = self.send("POST", "pages", &body)?;
        let page_id = resp
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Decode {
                page_id: String::new(),
                reason: "create response has no page id".into(),
            })?;
        log::debug!("Created Notion page {} for {}", page_id, truncate_for_log(item.id()));
        Ok(page_id)
    }

    fn update(&mut self, page_id: &str, item: &EmbeddedItem) -> Result<(), StoreError> {
        let body = json!({ "properties": item_properties(item) });
        self.send("PATCH", &format!("pages/{page_id}"), &body)?;
        Ok(())
    }

    fn archive(&mut self, page_id: &str) -> Result<(), StoreError> {
        self.send("PATCH", &format!("pages/{page_id}"), &json!({ "archived": true }))?;
        log::info!("Archived Notion page {}", page_id);
        Ok(())
    }
}

/// Decode every page of a database query, following `next_cursor` while `has_more`.
///
/// `fetch_page` receives the cursor for the page to fetch (`None` for the first one).
fn collect_query_pages<F>(mut fetch_page: F) -> Result<Vec<EmbeddedItem>, StoreError>
where
    F: FnMut(Option<&str>) -> Result<Value, StoreError>,
{
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let resp = fetch_page(cursor.as_deref())?;
        if let Some(results) = resp.get("results").and_then(|v| v.as_array()) {
            for page in results {
                out.push(page_to_item(page)?);
            }
        }

        match next_cursor(&resp) {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }

    Ok(out)
}

/// The cursor to continue from, or None when the query is exhausted.
fn next_cursor(resp: &Value) -> Option<String> {
    if !resp.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    resp.get("next_cursor")
        .and_then(|v| v.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Database properties for one item.
fn item_properties(item: &EmbeddedItem) -> Value {
    let vector_text = item
        .vector
        .as_ref()
        .map(|v| serde_json::to_string(v).unwrap_or_default())
        .unwrap_or_default();

    let mut props = Map::new();
    props.insert(PROP_SUBJECT.into(), json!({ "title": rich_text(&item.item.subject) }));
    props.insert(PROP_FROM.into(), json!({ "rich_text": rich_text(&item.item.sender) }));
    props.insert(PROP_DATE.into(), date_value(Some(&item.item.timestamp)));
    props.insert(PROP_CONTENT.into(), json!({ "rich_text": rich_text(&item.item.body) }));
    props.insert(PROP_VECTOR.into(), json!({ "rich_text": rich_text(&vector_text) }));
    props.insert(PROP_MESSAGE_ID.into(), json!({ "rich_text": rich_text(&item.item.id) }));
    props.insert(PROP_VECTORIZED_AT.into(), date_value(item.embedded_at.as_deref()));
    Value::Object(props)
}

/// Split into <=2000-char text segments; anything past the segment cap is dropped.
fn rich_text(text: &str) -> Value {
    let chars: Vec<char> = text.chars().collect();
    let max = config::notion::RICH_TEXT_SEGMENT_CHARS;
    let mut segments: Vec<Value> = chars
        .chunks(max)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": content } })
        })
        .collect();
    if segments.len() > config::notion::RICH_TEXT_MAX_SEGMENTS {
        log::warn!(
            "Text of {} chars exceeds Notion property limit, truncating to {} segments",
            chars.len(),
            config::notion::RICH_TEXT_MAX_SEGMENTS
        );
        segments.truncate(config::notion::RICH_TEXT_MAX_SEGMENTS);
    }
    Value::Array(segments)
}

/// Notion only accepts ISO-8601 starts (datetime or bare date); anything else is stored as an empty date.
fn date_value(ts: Option<&str>) -> Value {
    let is_iso = |s: &&str| DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok();
    match ts.filter(is_iso) {
        Some(s) => json!({ "date": { "start": s } }),
        None => json!({ "date": null }),
    }
}

/// Decode a database page into an EmbeddedItem.
///
/// Subject, From, Date, Content and Vector are required properties. Message ID and
/// Vectorized At are optional so pages written before they existed still load; such
/// pages use the Notion page id as the item id.
fn page_to_item(page: &Value) -> Result<EmbeddedItem, StoreError> {
    let page_id = page
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::Decode {
            page_id: String::new(),
            reason: "page has no id".into(),
        })?
        .to_string();
    let props = page
        .get("properties")
        .and_then(|v| v.as_object())
        .ok_or_else(|| decode_err(&page_id, "page has no properties"))?;

    let subject = read_text(required(props, PROP_SUBJECT, &page_id)?, "title", &page_id)?;
    let sender = read_text(required(props, PROP_FROM, &page_id)?, "rich_text", &page_id)?;
    let timestamp = read_date(required(props, PROP_DATE, &page_id)?, &page_id)?.unwrap_or_default();
    let body = read_text(required(props, PROP_CONTENT, &page_id)?, "rich_text", &page_id)?;
    let vector_text = read_text(required(props, PROP_VECTOR, &page_id)?, "rich_text", &page_id)?;

    let id = match props.get(PROP_MESSAGE_ID) {
        Some(p) => read_text(p, "rich_text", &page_id)?,
        None => String::new(),
    };
    let id = if id.is_empty() { page_id.clone() } else { id };

    let embedded_at = match props.get(PROP_VECTORIZED_AT) {
        Some(p) => read_date(p, &page_id)?,
        None => None,
    };

    Ok(EmbeddedItem {
        item: Item {
            id,
            subject,
            sender,
            timestamp,
            body,
        },
        vector: parse_vector(&vector_text, &page_id),
        embedded_at,
        page_id: Some(page_id),
    })
}

fn required<'a>(props: &'a Map<String, Value>, name: &str, page_id: &str) -> Result<&'a Value, StoreError> {
    props
        .get(name)
        .ok_or_else(|| decode_err(page_id, &format!("missing property {name:?}")))
}

fn decode_err(page_id: &str, reason: &str) -> StoreError {
    StoreError::Decode {
        page_id: page_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Concatenate the segments of a `title` or `rich_text` property.
fn read_text(prop: &Value, kind: &str, page_id: &str) -> Result<String, StoreError> {
    let segments = prop
        .get(kind)
        .and_then(|v| v.as_array())
        .ok_or_else(|| decode_err(page_id, &format!("expected a {kind} property")))?;
    Ok(segments
        .iter()
        .filter_map(|s| {
            s.get("plain_text")
                .or_else(|| s.get("text").and_then(|t| t.get("content")))
                .and_then(|v| v.as_str())
        })
        .collect())
}

fn read_date(prop: &Value, page_id: &str) -> Result<Option<String>, StoreError> {
    let date = prop
        .get("date")
        .ok_or_else(|| decode_err(page_id, "expected a date property"))?;
    Ok(date
        .get("start")
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

/// Empty or unparseable vectors make the page non-comparable rather than failing the read.
fn parse_vector(text: &str, page_id: &str) -> Option<Vec<f32>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<f32>>(text) {
        Ok(v) if !v.is_empty() => Some(v),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Page {} has an unreadable vector, skipping it for comparison: {}", page_id, e);
            None
        }
    }
}
