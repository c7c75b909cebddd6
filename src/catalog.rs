//! Registry of feed descriptors consumed by the collect stage.
//!
//! The catalog is loaded once at start-up, either from a JSON file (`SOURCES_FILE`) or from the
//! built-in list below, and is immutable afterwards. Only enabled sources are partitioned.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read source catalog {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The catalog file was not valid JSON for the descriptor schema.
    #[error("failed to parse source catalog {path}: {source}")]
    Parse {
        /// Path that was attempted.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// A descriptor carried a malformed mapper key.
    #[error("source {url} has invalid mapper key '{key}' (expected two lowercase letters)")]
    InvalidMapperKey {
        /// Feed URL of the offending descriptor.
        url: String,
        /// The rejected key.
        key: String,
    },
}

/// Static description of one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Human-readable publisher name.
    pub publisher: String,
    /// Default category applied to entries from this feed.
    pub category: String,
    /// Feed URL (RSS, Atom or JSON Feed).
    pub url: String,
    /// Lowercase two-letter code selecting the mapping strategy.
    pub mapper_key: String,
    /// Disabled sources are kept in the catalog but never collected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the feed already carries full article text, which skips scraping.
    #[serde(default)]
    pub has_full_content: bool,
}

fn default_true() -> bool {
    true
}

/// Immutable set of feed descriptors.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<SourceDescriptor>,
}

impl SourceCatalog {
    /// Build a catalog from descriptors, validating mapper keys.
    pub fn new(sources: Vec<SourceDescriptor>) -> Result<Self, CatalogError> {
        for source in &sources {
            if !is_valid_mapper_key(&source.mapper_key) {
                return Err(CatalogError::InvalidMapperKey {
                    url: source.url.clone(),
                    key: source.mapper_key.clone(),
                });
            }
        }
        Ok(Self { sources })
    }

    /// Load a catalog from a JSON array of descriptors.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let path_label = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path_label.clone(),
            source,
        })?;
        let sources: Vec<SourceDescriptor> =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path_label.clone(),
                source,
            })?;
        tracing::info!(path = %path_label, sources = sources.len(), "Loaded source catalog");
        Self::new(sources)
    }

    /// Load from `path` when given, otherwise fall back to the built-in feeds.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// The built-in catalog of general-interest feeds.
    pub fn builtin() -> Self {
        let sources = BUILTIN_SOURCES
            .iter()
            .map(
                |&(publisher, category, url, mapper_key, has_full_content)| SourceDescriptor {
                    publisher: publisher.to_string(),
                    category: category.to_string(),
                    url: url.to_string(),
                    mapper_key: mapper_key.to_string(),
                    enabled: true,
                    has_full_content,
                },
            )
            .collect();
        Self { sources }
    }

    /// Every descriptor, enabled or not.
    pub fn all(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// The enabled subset, in catalog order.
    pub fn enabled(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .filter(|source| source.enabled)
            .cloned()
            .collect()
    }
}

fn is_valid_mapper_key(key: &str) -> bool {
    key.len() == 2 && key.bytes().all(|byte| byte.is_ascii_lowercase())
}

const BUILTIN_SOURCES: &[(&str, &str, &str, &str, bool)] = &[
    ("AP News", "Top News", "https://feeds.apnews.com/rss/apf-topnews", "ap", false),
    ("BBC News", "World", "https://feeds.bbci.co.uk/news/world/rss.xml", "bb", false),
    ("BBC News", "Business", "https://feeds.bbci.co.uk/news/business/rss.xml", "bb", false),
    ("NPR", "National", "https://feeds.npr.org/1001/rss.xml", "np", false),
    ("The Guardian", "US News", "https://www.theguardian.com/us-news/rss", "gd", false),
    ("Al Jazeera", "World", "https://www.aljazeera.com/xml/rss/all.xml", "aj", false),
    ("Grist", "Environment", "https://grist.org/feed/", "gr", true),
    ("Inside Climate News", "Environment", "https://insideclimatenews.org/feed/", "gr", true),
    ("KFF Health News", "Health", "https://kffhealthnews.org/feed/", "gr", true),
];
