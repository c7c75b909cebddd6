use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the news pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string for the article store.
    pub database_url: String,
    /// Upper bound on pooled Postgres connections.
    pub database_max_connections: u32,
    /// Base URL of the Qdrant instance that serves the search index.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding article documents.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to vectorize summaries.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Provider used to summarize article bodies.
    pub summarization_provider: SummarizationProvider,
    /// Model identifier used for summaries.
    pub summarization_model: String,
    /// Word budget requested from the summarizer.
    pub summarization_max_words: usize,
    /// Optional Ollama runtime URL (defaults to localhost).
    pub ollama_url: Option<String>,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Optional base URL override for OpenAI-compatible endpoints.
    pub openai_base_url: Option<String>,
    /// Optional JSON file describing the feed catalog.
    pub sources_file: Option<PathBuf>,
    /// Number of partitions each job splits its working set into.
    pub grid_size: usize,
    /// Number of partitions executed concurrently.
    pub worker_count: usize,
    /// Per-partition skip budget.
    pub skip_limit: usize,
    /// Attempts made for retryable failures before giving up.
    pub retry_max_attempts: u32,
    /// Fixed backoff between attempts.
    pub retry_delay: Duration,
    /// TCP connect timeout for outbound HTTP.
    pub http_connect_timeout: Duration,
    /// Read timeout for outbound HTTP.
    pub http_read_timeout: Duration,
    /// Whether collected articles without an image are skipped.
    pub collector_require_image: bool,
    /// Trigger cadence for the collector job.
    pub collector_interval: Duration,
    /// Trigger cadence for the summarizer job.
    pub summarizer_interval: Duration,
    /// Trigger cadence for the embedder job.
    pub embedder_interval: Duration,
    /// Trigger cadence for the indexer job.
    pub indexer_interval: Duration,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

/// Supported summarization backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationProvider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible chat completions.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: load_env("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            summarization_provider: load_env_optional("SUMMARIZATION_PROVIDER")
                .map(|value| {
                    value.parse().map_err(|()| {
                        ConfigError::InvalidValue("SUMMARIZATION_PROVIDER".to_string())
                    })
                })
                .transpose()?
                .unwrap_or(SummarizationProvider::Ollama),
            summarization_model: load_env_optional("SUMMARIZATION_MODEL")
                .unwrap_or_else(|| "llama3.2".to_string()),
            summarization_max_words: parse_or("SUMMARIZATION_MAX_WORDS", 80)?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            sources_file: load_env_optional("SOURCES_FILE").map(PathBuf::from),
            grid_size: parse_positive("PIPELINE_GRID_SIZE", 4)?,
            worker_count: parse_positive("PIPELINE_WORKERS", 4)?,
            skip_limit: parse_or("PIPELINE_SKIP_LIMIT", 100)?,
            retry_max_attempts: parse_positive("RETRY_MAX_ATTEMPTS", 3)?,
            retry_delay: Duration::from_millis(parse_or("RETRY_DELAY_MS", 1_000)?),
            http_connect_timeout: Duration::from_millis(parse_or(
                "HTTP_CONNECT_TIMEOUT_MS",
                3_000,
            )?),
            http_read_timeout: Duration::from_millis(parse_or("HTTP_READ_TIMEOUT_MS", 5_000)?),
            collector_require_image: parse_or("COLLECTOR_REQUIRE_IMAGE", true)?,
            collector_interval: Duration::from_secs(parse_positive(
                "COLLECTOR_INTERVAL_SECS",
                1_800,
            )?),
            summarizer_interval: Duration::from_secs(parse_positive(
                "SUMMARIZER_INTERVAL_SECS",
                600,
            )?),
            embedder_interval: Duration::from_secs(parse_positive(
                "EMBEDDER_INTERVAL_SECS",
                600,
            )?),
            indexer_interval: Duration::from_secs(parse_positive("INDEXER_INTERVAL_SECS", 900)?),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = parse_or(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(key.to_string()));
    }
    Ok(value)
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for SummarizationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        grid_size = config.grid_size,
        workers = config.worker_count,
        skip_limit = config.skip_limit,
        embedding_provider = ?config.embedding_provider,
        summarization_provider = ?config.summarization_provider,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Once;

    /// Install a deterministic configuration for unit tests that read the global cache.
    pub(crate) fn ensure_test_config() -> &'static Config {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = CONFIG.set(Config {
                database_url: "postgres://localhost/newsdigest_test".into(),
                database_max_connections: 2,
                qdrant_url: "http://127.0.0.1:6333".into(),
                qdrant_collection_name: "articles-test".into(),
                qdrant_api_key: None,
                embedding_provider: EmbeddingProvider::Ollama,
                embedding_model: "nomic-embed-text".into(),
                embedding_dimension: 3,
                summarization_provider: SummarizationProvider::Ollama,
                summarization_model: "llama3.2".into(),
                summarization_max_words: 60,
                ollama_url: None,
                openai_api_key: None,
                openai_base_url: None,
                sources_file: None,
                grid_size: 2,
                worker_count: 2,
                skip_limit: 100,
                retry_max_attempts: 3,
                retry_delay: Duration::from_millis(1),
                http_connect_timeout: Duration::from_millis(500),
                http_read_timeout: Duration::from_millis(500),
                collector_require_image: true,
                collector_interval: Duration::from_secs(60),
                summarizer_interval: Duration::from_secs(60),
                embedder_interval: Duration::from_secs(60),
                indexer_interval: Duration::from_secs(60),
                server_port: None,
            });
        });
        get_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!(
            "OpenAI".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::OpenAI)
        );
        assert_eq!(
            "ollama".parse::<SummarizationProvider>(),
            Ok(SummarizationProvider::Ollama)
        );
        assert!("bogus".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn parse_or_falls_back_to_default_when_unset() {
        let value: usize = parse_or("NEWSDIGEST_TEST_UNSET_VARIABLE", 7).expect("default");
        assert_eq!(value, 7);
    }

    #[test]
    fn parse_positive_rejects_zero() {
        // SAFETY: this key is unique to this test and nothing else reads it.
        unsafe { env::set_var("NEWSDIGEST_TEST_ZERO_GRID", "0") };
        let error = parse_positive::<usize>("NEWSDIGEST_TEST_ZERO_GRID", 4).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "NEWSDIGEST_TEST_ZERO_GRID"));
    }
}
