//! Captured webhook event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One captured HTTP request.
///
/// Immutable once constructed: the capture server builds it, hands it to the
/// subscriber registry, and every subscriber receives its own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Unique per event, generated at capture time.
    pub id: Uuid,
    /// HTTP method of the captured request.
    pub method: String,
    /// Request path (field named `url` on the wire for frontend compatibility).
    #[serde(rename = "url")]
    pub path: String,
    /// Flattened header map, one value per name.
    pub headers: HashMap<String, String>,
    /// Full request body, captured eagerly. Carried as lossy UTF-8 text
    /// because the wire format serializes it as a JSON string.
    pub body: String,
    /// Flattened query parameters, one value per key.
    pub query_params: HashMap<String, String>,
    /// When the request was captured.
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Build an event from decomposed request parts.
    ///
    /// Duplicate header names and query keys keep the FIRST value seen;
    /// later duplicates are discarded.
    pub fn from_parts(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        query: impl IntoIterator<Item = (String, String)>,
        body: &[u8],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            path: path.into(),
            headers: flatten_first(headers),
            body: String::from_utf8_lossy(body).into_owned(),
            query_params: flatten_first(query),
            timestamp: Utc::now(),
        }
    }
}

/// Collect key/value pairs into a map, keeping the first value per key.
fn flatten_first(pairs: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (key, value) in pairs {
        map.entry(key).or_insert(value);
    }
    map
}
