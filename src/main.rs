use anyhow::Context;
use clap::{Parser, Subcommand};
use newsdigest::catalog::SourceCatalog;
use newsdigest::config::{self, Config};
use newsdigest::embedding::{EmbeddingClient, get_embedding_client};
use newsdigest::feed::HttpFeedClient;
use newsdigest::mapping::MappingRegistry;
use newsdigest::metrics::PipelineMetrics;
use newsdigest::pipeline::{JobKind, PipelineContext, PipelineSettings};
use newsdigest::qdrant::QdrantService;
use newsdigest::scheduler::{JobLauncher, ReadinessProbe};
use newsdigest::scrape::HttpArticleScraper;
use newsdigest::service::{PipelineApi, PipelineService, Schedule};
use newsdigest::store::PostgresStore;
use newsdigest::summarization::{SummarizationClient, get_summarization_client};
use newsdigest::{api, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "newsdigest", version, about = "Partitioned news ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control API and start the collector schedule (default).
    Serve,
    /// Run one job once and print its report as JSON.
    Run {
        /// collector, summarizer, embedder or indexer.
        job: JobKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::init_config().context("failed to load configuration")?;
    let context = build_context(config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, context).await,
        Command::Run { job } => run_once(context, job).await,
    }
}

async fn build_context(config: &Config) -> anyhow::Result<PipelineContext> {
    let store = PostgresStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to Postgres")?;
    store
        .ensure_schema()
        .await
        .context("failed to ensure article schema")?;

    let index = QdrantService::new(config).context("failed to build Qdrant client")?;
    index
        .ensure_collection(config.embedding_dimension as u64)
        .await
        .context("failed to ensure Qdrant collection")?;
    tracing::info!(collection = %index.collection(), "Search index ready");

    let catalog = SourceCatalog::load(config.sources_file.as_deref())?;
    tracing::info!(
        sources = catalog.all().len(),
        enabled = catalog.enabled().len(),
        "Loaded source catalog"
    );

    let summarizer: Arc<dyn SummarizationClient + Send + Sync> =
        get_summarization_client(config)?.into();
    let embedder: Arc<dyn EmbeddingClient + Send + Sync> = get_embedding_client(config)?.into();

    let mappers = MappingRegistry::with_builtin_publishers();
    tracing::debug!(keys = ?mappers.keys(), "Registered source mappers");

    Ok(PipelineContext {
        settings: PipelineSettings::from_config(config),
        store: Arc::new(store),
        catalog: Arc::new(catalog),
        mappers: Arc::new(mappers),
        feeds: Arc::new(HttpFeedClient::new(
            config.http_connect_timeout,
            config.http_read_timeout,
        )?),
        scraper: Arc::new(HttpArticleScraper::new(
            config.http_connect_timeout,
            config.http_read_timeout,
        )?),
        summarizer,
        embedder,
        index: Arc::new(index),
    })
}

async fn serve(config: &Config, context: PipelineContext) -> anyhow::Result<()> {
    let service = Arc::new(PipelineService::new(
        Arc::new(context),
        Schedule::from_config(config),
        ReadinessProbe::default(),
    ));

    match service.start_collector().await {
        Ok(response) => tracing::info!(message = %response.message, "Collector schedule active"),
        Err(error) => tracing::warn!(error = %error, "Collector did not start"),
    }

    let app = api::create_router(service.clone());
    let (listener, port) = bind_listener(config).await?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn run_once(context: PipelineContext, job: JobKind) -> anyhow::Result<()> {
    let launcher = Arc::new(JobLauncher::new(
        job,
        Arc::new(context),
        Arc::new(PipelineMetrics::new()),
    ));

    let interrupt = tokio::spawn({
        let launcher = Arc::clone(&launcher);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                launcher.request_stop();
            }
        }
    });

    let report = launcher.launch().await;
    interrupt.abort();
    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4200..=4299;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4200-4299",
    ))
}
