//! Full-text scraping for feeds that only publish teasers.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while scraping an article page.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Transport failure before a response arrived.
    #[error("failed to fetch article {url}: {reason}")]
    Fetch {
        /// Article URL.
        url: String,
        /// Transport detail.
        reason: String,
    },
    /// The connect or read timeout elapsed.
    #[error("timed out fetching article {url}")]
    Timeout {
        /// Article URL.
        url: String,
    },
    /// The server answered with a non-success status.
    #[error("article {url} returned {status}")]
    Status {
        /// Article URL.
        url: String,
        /// HTTP status code.
        status: StatusCode,
    },
}

impl ScrapeError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Text and lead image extracted from an article page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedPage {
    /// Body paragraphs joined by blank lines; empty when nothing was found.
    pub content: String,
    /// Lead image, usually from OpenGraph metadata.
    pub image_url: Option<String>,
}

/// Interface implemented by article scrapers.
#[async_trait]
pub trait ArticleScraper: Send + Sync {
    /// Download `url` and extract its article body.
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ScrapeError>;
}

/// Scraper backed by `reqwest` and `scraper`.
pub struct HttpArticleScraper {
    http: Client,
}

impl HttpArticleScraper {
    /// Build a scraper with explicit connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, ScrapeError> {
        let http = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; newsdigest/0.1)")
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|error| ScrapeError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {error}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ArticleScraper for HttpArticleScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ScrapeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(url, error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status,
            });
        }

        let html = response
            .text()
            .await
            .map_err(|error| transport_error(url, error))?;
        Ok(extract_article(&html))
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> ScrapeError {
    if error.is_timeout() {
        ScrapeError::Timeout {
            url: url.to_string(),
        }
    } else {
        ScrapeError::Fetch {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

const BODY_SELECTORS: [&str; 3] = ["article p", "main p", "p"];
const IMAGE_META_SELECTORS: [&str; 2] = [
    r#"meta[property="og:image"]"#,
    r#"meta[name="twitter:image"]"#,
];

/// Extract paragraphs and a lead image from an HTML document.
///
/// Paragraphs are taken from the most specific container that yields any text: `<article>`,
/// then `<main>`, then the whole document.
pub fn extract_article(html: &str) -> ScrapedPage {
    let document = Html::parse_document(html);

    let content = BODY_SELECTORS
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .map(|selector| {
            document
                .select(&selector)
                .map(|paragraph| normalize_whitespace(&paragraph.text().collect::<String>()))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|paragraphs| !paragraphs.is_empty())
        .map(|paragraphs| paragraphs.join("\n\n"))
        .unwrap_or_default();

    let image_url = IMAGE_META_SELECTORS
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .filter_map(|meta| meta.value().attr("content"))
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(str::to_string)
        })
        .or_else(|| {
            let selector = Selector::parse("article img[src]").ok()?;
            document
                .select(&selector)
                .filter_map(|img| img.value().attr("src"))
                .map(str::trim)
                .find(|value| value.starts_with("http"))
                .map(str::to_string)
        });

    ScrapedPage { content, image_url }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    const ARTICLE: &str = r#"<html><head>
        <meta property="og:image" content="https://cdn.example.org/lead.jpg">
        </head><body>
        <nav><p>Home | World</p></nav>
        <article>
          <h1>Council approves budget</h1>
          <p>The council   voted 7-2 on Tuesday.</p>
          <p></p>
          <p>The budget takes effect in July.</p>
        </article>
        </body></html>"#;

    #[test]
    fn extracts_article_paragraphs_and_og_image() {
        let page = extract_article(ARTICLE);
        assert_eq!(
            page.content,
            "The council voted 7-2 on Tuesday.\n\nThe budget takes effect in July."
        );
        assert_eq!(
            page.image_url.as_deref(),
            Some("https://cdn.example.org/lead.jpg")
        );
    }

    #[test]
    fn falls_back_to_document_paragraphs_and_inline_image() {
        let page = extract_article("<html><body><p>Only paragraph.</p></body></html>");
        assert_eq!(page.content, "Only paragraph.");
        assert!(page.image_url.is_none());

        let page = extract_article(
            r#"<article><img src="https://cdn.example.org/a.png"><p>Body</p></article>"#,
        );
        assert_eq!(
            page.image_url.as_deref(),
            Some("https://cdn.example.org/a.png")
        );
    }

    #[test]
    fn status_transience() {
        let server_error = ScrapeError::Status {
            url: "u".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        let not_found = ScrapeError::Status {
            url: "u".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(server_error.is_transient());
        assert!(!not_found.is_transient());
        assert!(ScrapeError::Timeout { url: "u".into() }.is_transient());
    }

    #[tokio::test]
    async fn http_scraper_reads_page() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/story");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(ARTICLE);
            })
            .await;

        let scraper = HttpArticleScraper::new(Duration::from_secs(1), Duration::from_secs(2))
            .expect("scraper");
        let page = scraper
            .scrape(&server.url("/story"))
            .await
            .expect("scraped page");
        assert!(page.content.starts_with("The council voted"));
    }

    #[tokio::test]
    async fn http_scraper_surfaces_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let scraper = HttpArticleScraper::new(Duration::from_secs(1), Duration::from_secs(2))
            .expect("scraper");
        let error = scraper
            .scrape(&server.url("/missing"))
            .await
            .expect_err("404");
        assert!(matches!(error, ScrapeError::Status { status, .. } if status == StatusCode::NOT_FOUND));
    }
}
