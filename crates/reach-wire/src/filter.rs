//! NIP-01 relay filters.

use nostr::Event;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The subset of NIP-01 filter fields this protocol uses.
///
/// Empty criteria match everything; set criteria are ANDed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayFilter {
    pub kinds: Vec<u16>,
    /// Author public keys, lowercase hex.
    pub authors: Vec<String>,
    /// Single-letter tag filters (`#L`, `#p`, `#d`, ...).
    pub tags: BTreeMap<char, Vec<String>>,
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

impl RelayFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn tag(mut self, letter: char, value: impl Into<String>) -> Self {
        self.tags.entry(letter).or_default().push(value.into());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Wire JSON object for a `REQ` frame.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if !self.kinds.is_empty() {
            obj.insert("kinds".into(), Value::from(self.kinds.clone()));
        }
        if !self.authors.is_empty() {
            obj.insert("authors".into(), Value::from(self.authors.clone()));
        }
        for (letter, values) in &self.tags {
            obj.insert(format!("#{letter}"), Value::from(values.clone()));
        }
        if let Some(since) = self.since {
            obj.insert("since".into(), Value::from(since));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".into(), Value::from(limit));
        }
        Value::Object(obj)
    }

    /// Whether `event` satisfies every criterion. `limit` is not considered.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u16()) {
            return false;
        }
        if !self.authors.is_empty() {
            let author = event.pubkey.to_hex();
            if !self.authors.iter().any(|a| a.eq_ignore_ascii_case(&author)) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at.as_u64() < since {
                return false;
            }
        }
        self.tags.iter().all(|(letter, wanted)| {
            let name = letter.to_string();
            event.tags.iter().any(|t| {
                let parts = t.as_slice();
                parts.len() >= 2 && parts[0] == name && wanted.iter().any(|w| *w == parts[1])
            })
        })
    }
}

impl Serialize for RelayFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, KIND_HEARTBEAT, KIND_SERVICE_CARD, LABEL_NAMESPACE};
    use reach_types::{Identity, Status};

    #[test]
    fn test_wire_json() {
        let filter = RelayFilter::new()
            .kind(KIND_SERVICE_CARD)
            .tag('L', LABEL_NAMESPACE)
            .since(10)
            .limit(100);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([31990]));
        assert_eq!(json["#L"], serde_json::json!(["agent-reach"]));
        assert_eq!(json["since"], 10);
        assert_eq!(json["limit"], 100);
        assert!(json.get("authors").is_none());
    }

    #[test]
    fn test_matches() {
        let identity = Identity::generate();
        let hb = codec::build_heartbeat_at(&identity, "x-v1", Status::Available, 1000).unwrap();

        let by_label = RelayFilter::new().kind(KIND_HEARTBEAT).tag('L', LABEL_NAMESPACE);
        assert!(by_label.matches(&hb));
        assert!(!RelayFilter::new().kind(KIND_SERVICE_CARD).matches(&hb));
        assert!(!by_label.clone().since(1001).matches(&hb));
        assert!(by_label
            .clone()
            .authors([identity.public_key_hex()])
            .matches(&hb));
        assert!(!by_label.authors(["00".repeat(32)]).matches(&hb));
        assert!(!RelayFilter::new().tag('d', "other").matches(&hb));
    }
}
