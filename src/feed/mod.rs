//! Feed transport: fetch a feed URL and return its entries in a publisher-neutral shape.
//!
//! Parsing is delegated to `feed-rs`, which handles RSS 0.9–2.0, Atom and JSON Feed. Namespaced
//! extension elements that `feed-rs` does not surface (Dublin Core dates and subjects, mostly)
//! are recovered from each item's raw markup so mapping strategies can fall back on them.

mod extensions;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub use extensions::{ScannedItem, scan_items};

/// Errors surfaced while fetching or parsing a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request failed before a usable response arrived, or the server returned an error.
    #[error("failed to fetch feed {url}: {reason}")]
    Fetch {
        /// Feed URL.
        url: String,
        /// Transport or status detail.
        reason: String,
    },
    /// The connect or read timeout elapsed.
    #[error("timed out fetching feed {url}")]
    Timeout {
        /// Feed URL.
        url: String,
    },
    /// The body was not a recognizable feed document.
    #[error("failed to parse feed {url}: {reason}")]
    Parsing {
        /// Feed URL.
        url: String,
        /// Parser detail.
        reason: String,
    },
}

/// One entry as published by a feed, before any publisher-specific mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    /// Feed-supplied identifier (`guid` / Atom `id`).
    pub id: String,
    /// Entry title, if present.
    pub title: Option<String>,
    /// First link, if present.
    pub link: Option<String>,
    /// Publication date.
    pub published: Option<DateTime<Utc>>,
    /// Last-updated date.
    pub updated: Option<DateTime<Utc>>,
    /// Short description / summary text.
    pub description: Option<String>,
    /// Full content body when the feed carries one.
    pub content: Option<String>,
    /// Category terms attached to the entry.
    pub categories: Vec<String>,
    /// Thumbnail or enclosure image.
    pub image_url: Option<String>,
    /// Namespaced extension elements keyed by qualified name, e.g. `dc:date`.
    pub extensions: BTreeMap<String, String>,
    /// The entry's raw markup, when it could be located in the document.
    pub raw_markup: Option<String>,
}

/// Interface implemented by feed transports.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch and parse the feed at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError>;
}

/// Feed transport over HTTP.
pub struct HttpFeedClient {
    http: Client,
}

impl HttpFeedClient {
    /// Build a client with explicit connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder()
            .user_agent("newsdigest/feed")
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|error| FeedError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {error}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(url, error))?;

        if !response.status().is_success() {
            return Err(FeedError::Fetch {
                url: url.to_string(),
                reason: format!("server returned {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| transport_error(url, error))?;
        let entries = parse_feed(url, &bytes)?;
        tracing::debug!(url, entries = entries.len(), "Fetched feed");
        Ok(entries)
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> FeedError {
    if error.is_timeout() {
        FeedError::Timeout {
            url: url.to_string(),
        }
    } else {
        FeedError::Fetch {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Parse a feed document into raw entries.
pub fn parse_feed(url: &str, body: &[u8]) -> Result<Vec<RawEntry>, FeedError> {
    let feed = feed_rs::parser::parse(body).map_err(|error| FeedError::Parsing {
        url: url.to_string(),
        reason: error.to_string(),
    })?;

    let markup = String::from_utf8_lossy(body);
    let mut scanned = scan_items(&markup);
    if scanned.len() != feed.entries.len() {
        tracing::debug!(
            url,
            parsed = feed.entries.len(),
            scanned = scanned.len(),
            "Item markup did not line up with parsed entries; extensions unavailable"
        );
        scanned.clear();
    }
    let mut scanned = scanned.into_iter();

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| {
            let item = scanned.next().unwrap_or_default();
            let image_url = entry.media.iter().find_map(|media| {
                media
                    .thumbnails
                    .first()
                    .map(|thumbnail| thumbnail.image.uri.clone())
                    .or_else(|| {
                        media
                            .content
                            .iter()
                            .find_map(|content| content.url.as_ref().map(|url| url.to_string()))
                    })
            });
            RawEntry {
                link: entry
                    .links
                    .first()
                    .map(|link| link.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone())),
                id: entry.id,
                title: entry.title.map(|text| text.content),
                published: entry.published,
                updated: entry.updated,
                description: entry.summary.map(|text| text.content),
                content: entry.content.and_then(|content| content.body),
                categories: entry
                    .categories
                    .into_iter()
                    .map(|category| category.label.unwrap_or(category.term))
                    .collect(),
                image_url,
                extensions: item.extensions,
                raw_markup: item.markup,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example Wire</title>
    <link>https://news.example.org</link>
    <description>Example</description>
    <item>
      <title>Council approves budget</title>
      <link>https://news.example.org/politics/2024/05/01/123456/council-budget</link>
      <guid>https://news.example.org/?p=123456</guid>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
      <description>The council voted 7-2.</description>
      <category>Politics</category>
      <category>Local</category>
    </item>
    <item>
      <title>Storm warning issued</title>
      <link>https://news.example.org/weather/987</link>
      <guid>https://news.example.org/?p=987</guid>
      <dc:date>2024-05-02T08:30:00Z</dc:date>
      <description>Heavy rain expected.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parse_feed_maps_entries_and_extensions() {
        let entries = parse_feed("https://news.example.org/rss", SAMPLE_RSS.as_bytes())
            .expect("parsed feed");
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title.as_deref(), Some("Council approves budget"));
        assert_eq!(
            first.link.as_deref(),
            Some("https://news.example.org/politics/2024/05/01/123456/council-budget")
        );
        assert_eq!(first.categories, vec!["Politics", "Local"]);
        assert!(first.published.is_some());
        assert!(first.raw_markup.as_deref().unwrap_or("").contains("Council"));

        let second = &entries[1];
        assert_eq!(
            second.extensions.get("dc:date").map(String::as_str),
            Some("2024-05-02T08:30:00Z")
        );
    }

    #[test]
    fn parse_feed_rejects_non_feed_documents() {
        let error = parse_feed("https://x.example", b"<html><body>nope</body></html>")
            .expect_err("not a feed");
        assert!(matches!(error, FeedError::Parsing { .. }));
    }

    #[tokio::test]
    async fn http_client_fetches_and_parses() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/rss");
                then.status(200)
                    .header("content-type", "application/rss+xml")
                    .body(SAMPLE_RSS);
            })
            .await;

        let client = HttpFeedClient::new(Duration::from_secs(1), Duration::from_secs(2))
            .expect("client");
        let entries = client.fetch(&server.url("/rss")).await.expect("entries");

        mock.assert();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn http_client_reports_error_status_as_fetch_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(503).body("unavailable");
            })
            .await;

        let client = HttpFeedClient::new(Duration::from_secs(1), Duration::from_secs(2))
            .expect("client");
        let error = client
            .fetch(&server.url("/gone"))
            .await
            .expect_err("error status");
        assert!(matches!(error, FeedError::Fetch { reason, .. } if reason.contains("503")));
    }
}
