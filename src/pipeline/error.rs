//! Stage error taxonomy and its retry/skip decision table.

use crate::embedding::EmbeddingClientError;
use crate::feed::FeedError;
use crate::mapping::MappingError;
use crate::qdrant::QdrantError;
use crate::retry::RetryDecision;
use crate::scrape::ScrapeError;
use crate::store::{StoreError, VectorCodecError};
use crate::summarization::SummarizationClientError;
use serde::Serialize;
use thiserror::Error;

/// How the executor treats a failed item, read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; retry within the attempt budget, then skip.
    Retryable,
    /// Permanent for this item; drop it and charge the skip budget.
    Skippable,
    /// Configuration or infrastructure defect; abort the partition.
    Fatal,
}

/// Any failure surfaced by a stage reader, processor or writer.
#[derive(Debug, Error)]
pub enum StageError {
    /// Feed transport failure.
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// Article scraping failure.
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    /// No mapping strategy for a source.
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// Entry carried no usable link.
    #[error("entry '{id}' has no link")]
    MissingLink {
        /// Feed identifier of the entry.
        id: String,
    },
    /// Neither the feed nor the page yielded article text.
    #[error("article {link} has no content")]
    EmptyArticleContent {
        /// Article link.
        link: String,
    },
    /// No lead image could be found and one is required.
    #[error("article {link} has no image")]
    EmptyArticleImage {
        /// Article link.
        link: String,
    },
    /// AI summarizer or embedder failure.
    #[error("external API error: {0}")]
    ExternalApi(String),
    /// Stored vector could not be decoded.
    #[error(transparent)]
    VectorCodec(#[from] VectorCodecError),
    /// Relational store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Search index failure.
    #[error(transparent)]
    Index(#[from] QdrantError),
}

impl StageError {
    /// The decision table: which class each error kind belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Feed(_) => ErrorClass::Retryable,
            Self::Scrape(error) if error.is_transient() => ErrorClass::Retryable,
            Self::Scrape(_) => ErrorClass::Skippable,
            Self::Mapping(_) => ErrorClass::Fatal,
            Self::MissingLink { .. }
            | Self::EmptyArticleContent { .. }
            | Self::EmptyArticleImage { .. }
            | Self::VectorCodec(_) => ErrorClass::Skippable,
            Self::ExternalApi(_) | Self::Index(_) => ErrorClass::Retryable,
            Self::Store(StoreError::UniqueViolation { .. }) => ErrorClass::Skippable,
            Self::Store(_) => ErrorClass::Retryable,
        }
    }

    /// Map the class onto the retry wrapper's two-way decision.
    pub fn retry_decision(&self) -> RetryDecision {
        match self.class() {
            ErrorClass::Retryable => RetryDecision::Retryable,
            ErrorClass::Skippable | ErrorClass::Fatal => RetryDecision::Fatal,
        }
    }
}

impl From<EmbeddingClientError> for StageError {
    fn from(error: EmbeddingClientError) -> Self {
        Self::ExternalApi(error.to_string())
    }
}

impl From<SummarizationClientError> for StageError {
    fn from(error: SummarizationClientError) -> Self {
        Self::ExternalApi(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn decision_table_matches_taxonomy() {
        let cases = [
            (
                StageError::Feed(FeedError::Timeout { url: "u".into() }),
                ErrorClass::Retryable,
            ),
            (
                StageError::Feed(FeedError::Parsing {
                    url: "u".into(),
                    reason: "bad".into(),
                }),
                ErrorClass::Retryable,
            ),
            (
                StageError::Mapping(MappingError::MapperNotFound("xx".into())),
                ErrorClass::Fatal,
            ),
            (
                StageError::EmptyArticleContent { link: "l".into() },
                ErrorClass::Skippable,
            ),
            (
                StageError::EmptyArticleImage { link: "l".into() },
                ErrorClass::Skippable,
            ),
            (
                StageError::ExternalApi("down".into()),
                ErrorClass::Retryable,
            ),
            (
                StageError::Scrape(ScrapeError::Status {
                    url: "u".into(),
                    status: StatusCode::NOT_FOUND,
                }),
                ErrorClass::Skippable,
            ),
            (
                StageError::Scrape(ScrapeError::Timeout { url: "u".into() }),
                ErrorClass::Retryable,
            ),
        ];

        for (error, class) in cases {
            assert_eq!(error.class(), class, "{error}");
        }
    }

    #[test]
    fn only_retryable_errors_are_retried() {
        assert_eq!(
            StageError::ExternalApi("x".into()).retry_decision(),
            RetryDecision::Retryable
        );
        assert_eq!(
            StageError::EmptyArticleContent { link: "l".into() }.retry_decision(),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn ai_client_errors_become_external_api_errors() {
        let error: StageError =
            EmbeddingClientError::GenerationFailed("Ollama returned 500".into()).into();
        assert!(matches!(error, StageError::ExternalApi(message) if message.contains("500")));
    }
}
