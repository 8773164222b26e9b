// gmail.rs - Gmail REST client (users.messages.list / users.messages.get).
//
// Auth is a bearer access token obtained elsewhere; this client never refreshes it.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config;
use crate::error::{fetch_error_from_ureq, FetchError};
use crate::item::{to_iso, Item};
use crate::mail::MailSource;

pub struct GmailClient {
    agent: ureq::Agent,
    api_base: String,
    access_token: String,
}

impl GmailClient {
    pub fn new(access_token: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config::http::REQUEST_TIMEOUT_SECS))
            .build();
        Self {
            agent,
            api_base: config::gmail::API_BASE.to_string(),
            access_token,
        }
    }

    fn get_json(&self, req: ureq::Request) -> Result<Value, FetchError> {
        let resp = req
            .set("Authorization", &format!("Bearer {}", self.access_token))
            .call()
            .map_err(fetch_error_from_ureq)?;
        let text = resp.into_string().map_err(|e| FetchError::Http(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| FetchError::Http(format!("invalid JSON from Gmail: {e}")))
    }
}

impl MailSource for GmailClient {
    fn list_item_ids(&self, query: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/messages", self.api_base);
        let ids = collect_list_pages(|page_token| {
            let mut req = self
                .agent
                .get(&url)
                .query("q", query)
                .query("maxResults", &config::gmail::LIST_PAGE_SIZE.to_string());
            if let Some(token) = page_token {
                req = req.query("pageToken", token);
            }
            self.get_json(req)
        })?;

        log::info!("Gmail query {:?} matched {} messages", query, ids.len());
        Ok(ids)
    }

    fn fetch_item(&self, id: &str) -> Result<Item, FetchError> {
        let url = format!("{}/messages/{}", self.api_base, id);
        let req = self.agent.get(&url).query("format", "full");
        let message = match self.get_json(req) {
            Err(FetchError::Status { status: 404, .. }) => return Err(FetchError::Missing(id.to_string())),
            other => other?,
        };
        message_to_item(id, &message)
    }
}

/// Follow `nextPageToken` until the listing is exhausted.
///
/// `fetch_page` receives the token for the page to fetch (`None` for the first one).
fn collect_list_pages<F>(mut fetch_page: F) -> Result<Vec<String>, FetchError>
where
    F: FnMut(Option<&str>) -> Result<Value, FetchError>,
{
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = fetch_page(page_token.as_deref())?;
        let (page_ids, next) = parse_list_page(&page);
        log::debug!("Gmail list page: {} ids, more={}", page_ids.len(), next.is_some());
        ids.extend(page_ids);

        match next {
            Some(t) => page_token = Some(t),
            None => break,
        }
    }

    Ok(ids)
}

/// Message ids and the next page token from a `messages.list` response.
fn parse_list_page(page: &Value) -> (Vec<String>, Option<String>) {
    let ids = page
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.get("id").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let next = page
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (ids, next)
}

/// Convert a `format=full` message resource into an Item.
fn message_to_item(id: &str, message: &Value) -> Result<Item, FetchError> {
    let payload = message.get("payload").ok_or_else(|| FetchError::Decode {
        id: id.to_string(),
        reason: "missing payload".into(),
    })?;

    let subject = header(payload, "Subject").unwrap_or_default();
    let sender = header(payload, "From").unwrap_or_default();
    let date_header = header(payload, "Date");
    let internal_date = message.get("internalDate").and_then(|v| v.as_str());

    let timestamp = resolve_timestamp(date_header.as_deref(), internal_date).ok_or_else(|| FetchError::Decode {
        id: id.to_string(),
        reason: "no Date header and no internalDate".into(),
    })?;

    let body = match find_body_data(payload) {
        Some(data) => decode_base64url(data).map_err(|reason| FetchError::Decode {
            id: id.to_string(),
            reason,
        })?,
        None => String::new(),
    };

    Ok(Item {
        id: id.to_string(),
        subject,
        sender,
        timestamp,
        body,
    })
}

fn header(payload: &Value, name: &str) -> Option<String> {
    payload
        .get("headers")
        .and_then(|v| v.as_array())?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(|n| n.as_str())
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h.get("value").and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Date header (RFC 2822) first, then `internalDate` (epoch ms), then the raw header text.
fn resolve_timestamp(date_header: Option<&str>, internal_date_ms: Option<&str>) -> Option<String> {
    if let Some(raw) = date_header {
        // Strip trailing comments like "(UTC)".
        let cleaned = raw.split('(').next().unwrap_or(raw).trim();
        if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
            return Some(to_iso(dt.with_timezone(&Utc)));
        }
    }
    if let Some(ms) = internal_date_ms.and_then(|s| s.parse::<i64>().ok()) {
        if let Some(dt) = DateTime::from_timestamp_millis(ms) {
            return Some(to_iso(dt));
        }
    }
    date_header.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Depth-first: the first `text/plain` part with data, else the first part with any data.
fn find_body_data(payload: &Value) -> Option<&str> {
    find_part_data(payload, Some("text/plain")).or_else(|| find_part_data(payload, None))
}

fn find_part_data<'a>(part: &'a Value, mime: Option<&str>) -> Option<&'a str> {
    let mime_ok = match mime {
        Some(want) => part.get("mimeType").and_then(|v| v.as_str()) == Some(want),
        None => true,
    };
    if mime_ok {
        if let Some(data) = part
            .get("body")
            .and_then(|b| b.get("data"))
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
        {
            return Some(data);
        }
    }
    part.get("parts")
        .and_then(|p| p.as_array())?
        .iter()
        .find_map(|child| find_part_data(child, mime))
}

/// Decode Gmail's base64url body data; tolerates padding and the standard alphabet.
fn decode_base64url(data: &str) -> Result<String, String> {
    let normalized: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| format!("invalid base64url body: {e}"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(s: &str) -> String {
        URL_SAFE_NO_PAD.encode(s.as_bytes())
    }

    #[test]
    fn test_parse_list_page() {
        let page = json!({
            "messages": [{ "id": "a", "threadId": "t" }, { "id": "b", "threadId": "t" }],
            "nextPageToken": "tok",
            "resultSizeEstimate": 2
        });
        let (ids, next) = parse_list_page(&page);
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(next.as_deref(), Some("tok"));

        let (ids, next) = parse_list_page(&json!({ "resultSizeEstimate": 0 }));
        assert!(ids.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_collect_list_pages_follows_tokens() {
        let pages = [
            json!({ "messages": [{ "id": "a" }, { "id": "b" }], "nextPageToken": "p2" }),
            json!({ "messages": [{ "id": "c" }], "nextPageToken": "p3" }),
            json!({ "messages": [{ "id": "d" }], "nextPageToken": "" }),
        ];
        let mut seen: Vec<Option<String>> = Vec::new();
        let ids = collect_list_pages(|token| {
            seen.push(token.map(str::to_string));
            Ok(pages[seen.len() - 1].clone())
        })
        .unwrap();

        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(seen, vec![None, Some("p2".to_string()), Some("p3".to_string())]);
    }

    #[test]
    fn test_collect_list_pages_propagates_page_error() {
        let mut calls = 0;
        let result = collect_list_pages(|_| {
            calls += 1;
            match calls {
                1 => Ok(json!({ "messages": [{ "id": "a" }], "nextPageToken": "p2" })),
                _ => Err(FetchError::Status {
                    status: 429,
                    body: "rateLimitExceeded".into(),
                }),
            }
        });
        assert!(matches!(result, Err(FetchError::Status { status: 429, .. })));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_message_to_item_multipart_prefers_text_plain() {
        let msg = json!({
            "id": "m1",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    { "name": "subject", "value": "SQL Interview Questions" },
                    { "name": "From", "value": "Recruiter <r@example.com>" },
                    { "name": "Date", "value": "Tue, 14 Nov 2023 22:13:20 +0000 (UTC)" }
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            { "mimeType": "text/html", "body": { "data": b64("<p>html</p>") } },
                            { "mimeType": "text/plain", "body": { "data": b64("plain text ✓") } }
                        ]
                    }
                ]
            }
        });
        let item = message_to_item("m1", &msg).unwrap();
        assert_eq!(item.subject, "SQL Interview Questions");
        assert_eq!(item.sender, "Recruiter <r@example.com>");
        assert_eq!(item.timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(item.body, "plain text ✓");
    }

    #[test]
    fn test_message_to_item_single_part_and_internal_date_fallback() {
        let msg = json!({
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/html",
                "headers": [{ "name": "Date", "value": "not a date" }],
                "body": { "data": b64("<b>hi</b>") }
            }
        });
        let item = message_to_item("m2", &msg).unwrap();
        assert_eq!(item.body, "<b>hi</b>");
        assert_eq!(item.timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(item.subject, "");
    }

    #[test]
    fn test_message_without_body_data_has_empty_body() {
        let msg = json!({
            "internalDate": "0",
            "payload": { "mimeType": "multipart/mixed", "headers": [], "parts": [] }
        });
        assert_eq!(message_to_item("m3", &msg).unwrap().body, "");
    }

    #[test]
    fn test_message_without_payload_or_date_is_decode_error() {
        assert!(matches!(
            message_to_item("m4", &json!({})),
            Err(FetchError::Decode { .. })
        ));
        assert!(matches!(
            message_to_item("m5", &json!({ "payload": { "headers": [] } })),
            Err(FetchError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_base64url_variants() {
        // "??>" encodes to "Pz8+" (standard) / "Pz8-" (url-safe)
        assert_eq!(decode_base64url("Pz8-").unwrap(), "??>");
        assert_eq!(decode_base64url("Pz8+").unwrap(), "??>");
        // padded input
        assert_eq!(decode_base64url("aGk=").unwrap(), "hi");
        assert!(decode_base64url("***").is_err());
    }
}
