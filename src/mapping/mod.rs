//! Publisher-specific entry mapping.
//!
//! Feeds disagree on where they put article identifiers, which date field they fill and how they
//! tag categories. Each publisher family gets a [`SourceMapper`] strategy registered under its
//! two-letter mapper key; the collect stage resolves the strategy once per partition and stays
//! publisher-agnostic otherwise.

pub mod publishers;

use crate::catalog::SourceDescriptor;
use crate::feed::RawEntry;
use chrono::{DateTime, Utc};
use scraper::Html;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the mapping registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// No strategy is registered for the requested key.
    #[error("no mapper registered for key '{0}'")]
    MapperNotFound(String),
}

/// Extension fields consulted, in order, when the feed's own dates are missing.
const DATE_EXTENSIONS: [&str; 4] = [
    "dc:date",
    "dcterms:modified",
    "dcterms:created",
    "prism:publicationDate",
];

/// Transform logic for one publisher family.
///
/// Only [`extract_guid`](SourceMapper::extract_guid) is mandatory; every other method has a
/// default that suits well-formed RSS.
pub trait SourceMapper: Send + Sync {
    /// Publisher-derived secondary identifier: the mapper key followed by a numeric or opaque
    /// suffix.
    fn extract_guid(&self, entry: &RawEntry, source: &SourceDescriptor) -> String;

    /// Category stored with the article; defaults to the source's static category.
    fn extract_category(&self, _entry: &RawEntry, source: &SourceDescriptor) -> String {
        source.category.clone()
    }

    /// Publication time: feed date, then update date, then extension markup, then now.
    fn extract_published_at(&self, entry: &RawEntry) -> DateTime<Utc> {
        entry
            .published
            .or(entry.updated)
            .or_else(|| {
                DATE_EXTENSIONS
                    .iter()
                    .filter_map(|key| entry.extensions.get(*key))
                    .find_map(|value| parse_timestamp(value))
            })
            .unwrap_or_else(Utc::now)
    }

    /// Display title, whitespace-normalized.
    fn extract_title(&self, entry: &RawEntry) -> String {
        entry
            .title
            .as_deref()
            .map(plain_text)
            .unwrap_or_default()
    }

    /// Canonical article link; `None` drops the entry.
    fn extract_link(&self, entry: &RawEntry) -> Option<String> {
        entry
            .link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(str::to_string)
    }

    /// Feed-supplied teaser or body text with markup removed.
    fn extract_description(&self, entry: &RawEntry) -> Option<String> {
        entry
            .description
            .as_deref()
            .map(plain_text)
            .filter(|text| !text.is_empty())
    }
}

/// Key-to-strategy dispatch table.
#[derive(Clone, Default)]
pub struct MappingRegistry {
    mappers: HashMap<String, Arc<dyn SourceMapper>>,
}

impl MappingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every built-in publisher strategy.
    pub fn with_builtin_publishers() -> Self {
        let mut registry = Self::new();
        publishers::register_all(&mut registry);
        registry
    }

    /// Register `mapper` under `key`, replacing any previous strategy for that key.
    pub fn register(&mut self, key: impl Into<String>, mapper: Arc<dyn SourceMapper>) {
        self.mappers.insert(key.into(), mapper);
    }

    /// Look up the strategy for `key`.
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn SourceMapper>, MappingError> {
        self.mappers
            .get(key)
            .cloned()
            .ok_or_else(|| MappingError::MapperNotFound(key.to_string()))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.mappers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Parse RFC 3339 or RFC 2822 timestamps found in extension markup.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
}

/// Strip markup from a feed fragment and collapse whitespace.
pub fn plain_text(fragment: &str) -> String {
    let text = if fragment.contains('<') {
        Html::parse_fragment(fragment)
            .root_element()
            .text()
            .collect::<String>()
    } else {
        fragment.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `key` followed by the first 16 hex characters of SHA-256 over `input`.
pub fn opaque_guid(key: &str, input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{key}{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Plain;

    impl SourceMapper for Plain {
        fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
            opaque_guid("zz", &entry.id)
        }
    }

    #[test]
    fn resolve_reports_missing_keys() {
        let mut registry = MappingRegistry::new();
        registry.register("zz", Arc::new(Plain));

        assert!(registry.resolve("zz").is_ok());
        assert_eq!(
            registry.resolve("xx").err(),
            Some(MappingError::MapperNotFound("xx".into()))
        );
    }

    #[test]
    fn builtin_registry_covers_catalog_keys() {
        let registry = MappingRegistry::with_builtin_publishers();
        for source in crate::catalog::SourceCatalog::builtin().all() {
            assert!(registry.resolve(&source.mapper_key).is_ok(), "{}", source.mapper_key);
        }
    }

    #[test]
    fn published_at_falls_back_through_extensions() {
        let mut entry = RawEntry::default();
        entry
            .extensions
            .insert("dc:date".into(), "2024-05-02T08:30:00Z".into());
        assert_eq!(
            Plain.extract_published_at(&entry),
            Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap()
        );

        let updated = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        entry.updated = Some(updated);
        assert_eq!(Plain.extract_published_at(&entry), updated);
    }

    #[test]
    fn published_at_defaults_to_now_when_unparsable() {
        let mut entry = RawEntry::default();
        entry.extensions.insert("dc:date".into(), "yesterday".into());
        let before = Utc::now();
        assert!(Plain.extract_published_at(&entry) >= before);
    }

    #[test]
    fn description_is_stripped_of_markup() {
        let entry = RawEntry {
            description: Some("<p>Heavy <b>rain</b>\n expected.</p>".into()),
            ..RawEntry::default()
        };
        assert_eq!(
            Plain.extract_description(&entry).as_deref(),
            Some("Heavy rain expected.")
        );
    }

    #[test]
    fn opaque_guid_is_stable() {
        let first = opaque_guid("ap", "tag:apnews.com:abc");
        assert_eq!(first, opaque_guid("ap", "tag:apnews.com:abc"));
        assert_eq!(first.len(), 18);
        assert!(first.starts_with("ap"));
    }
}
