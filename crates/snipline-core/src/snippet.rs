#![forbid(unsafe_code)]

//! Stored snippet records as returned by the external store.

use serde::{Deserialize, Serialize};

/// One stored snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
}

impl Snippet {
    /// Case-insensitive match of `needle` against title, content and category.
    ///
    /// `needle` must already be lowercased; an empty needle matches everything.
    #[must_use]
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        [&self.title, &self.content, &self.category]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Decode a store payload, degrading to an empty list on any error.
///
/// The store contract is "never throws"; malformed payloads are logged and
/// treated as an empty library.
#[must_use]
pub fn decode_snippets(json: &str) -> Vec<Snippet> {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(value) => snippets_from_value(value),
        Err(err) => {
            tracing::warn!(error = %err, "snippet payload rejected, using empty list");
            Vec::new()
        }
    }
}

/// [`decode_snippets`] for a payload that is already parsed.
#[must_use]
pub fn snippets_from_value(value: serde_json::Value) -> Vec<Snippet> {
    match serde_json::from_value::<Vec<Snippet>>(value) {
        Ok(list) => list,
        Err(err) => {
            tracing::warn!(error = %err, "snippet payload rejected, using empty list");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> Snippet {
        Snippet {
            id: "1".into(),
            title: "Hello".into(),
            content: "Hi there".into(),
            category: "General".into(),
            created_at: 0,
        }
    }

    #[test]
    fn matches_any_field() {
        let s = hello();
        assert!(s.matches_lowercase("hello"));
        assert!(s.matches_lowercase("there"));
        assert!(s.matches_lowercase("general"));
        assert!(!s.matches_lowercase("absent"));
        assert!(s.matches_lowercase(""));
    }

    #[test]
    fn decode_accepts_camel_case_and_missing_fields() {
        let list = decode_snippets(
            r#"[{"id":"1","title":"Hello","content":"Hi there","createdAt":17}]"#,
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].created_at, 17);
        assert_eq!(list[0].category, "");
    }

    #[test]
    fn decode_degrades_to_empty() {
        assert!(decode_snippets("{not json").is_empty());
        assert!(decode_snippets(r#"{"id":"1"}"#).is_empty());
    }
}
