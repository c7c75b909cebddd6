//! Helpers for constructing Qdrant points from article documents.

use crate::qdrant::types::IndexDocument;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Deterministic point id for an article link, so re-indexing overwrites instead of duplicating.
pub fn point_id_for_link(link: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, link.as_bytes())
}

/// Build the payload object stored alongside each indexed article.
pub(crate) fn build_payload(document: &IndexDocument, indexed_at: DateTime<Utc>) -> Value {
    let mut payload = Map::new();
    payload.insert("article_id".into(), Value::from(document.article_id));
    payload.insert("link".into(), Value::String(document.link.clone()));
    payload.insert("title".into(), Value::String(document.title.clone()));
    payload.insert("category".into(), Value::String(document.category.clone()));
    payload.insert("guid".into(), Value::String(document.guid.clone()));
    payload.insert("publisher".into(), Value::String(publisher_code(&document.guid)));
    payload.insert(
        "published_at".into(),
        Value::String(rfc3339(document.published_at)),
    );
    payload.insert("summary".into(), Value::String(document.summary.clone()));
    payload.insert("indexed_at".into(), Value::String(rfc3339(indexed_at)));

    if let Some(image_url) = document
        .image_url
        .as_ref()
        .filter(|value| !value.is_empty())
    {
        payload.insert("image_url".into(), Value::String(image_url.clone()));
    }

    Value::Object(payload)
}

/// Serialize a document into the point shape accepted by `PUT /points`.
pub(crate) fn build_point(document: &IndexDocument, indexed_at: DateTime<Utc>) -> Value {
    json!({
        "id": point_id_for_link(&document.link).to_string(),
        "vector": document.vector,
        "payload": build_payload(document, indexed_at),
    })
}

fn publisher_code(guid: &str) -> String {
    guid.chars().take(2).collect()
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn document() -> IndexDocument {
        IndexDocument {
            article_id: 42,
            link: "https://news.example.org/a".into(),
            title: "Council approves budget".into(),
            category: "Politics".into(),
            guid: "np1248312345".into(),
            published_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            summary: "The council voted.".into(),
            image_url: None,
            vector: vec![0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn point_ids_are_stable_per_link() {
        let first = point_id_for_link("https://news.example.org/a");
        assert_eq!(first, point_id_for_link("https://news.example.org/a"));
        assert_ne!(first, point_id_for_link("https://news.example.org/b"));
        assert_eq!(first.get_version_num(), 5);
    }

    #[test]
    fn payload_carries_filterable_fields() {
        let indexed_at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let payload = build_payload(&document(), indexed_at);

        assert_eq!(payload["article_id"], 42);
        assert_eq!(payload["publisher"], "np");
        assert_eq!(payload["published_at"], "2024-05-01T10:00:00Z");
        assert_eq!(payload["indexed_at"], "2024-05-02T00:00:00Z");
        assert!(payload.get("image_url").is_none());
    }
}
