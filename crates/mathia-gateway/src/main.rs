use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use mathia_cache::{RateLimiter, TtlCache};
use mathia_connectors::connectors::info::InfoConfig;
use mathia_connectors::connectors::messaging::MessagingConfig;
use mathia_connectors::{
    CalendarConnector, Dispatcher, InfoConnector, ItineraryConnector, McpRouter,
    MessagingConnector, ModerationConnector, ReminderConnector, TravelConnector, WalletConnector,
};
use mathia_core::config::MathiaConfig;
use mathia_crypto::Keystore;
use mathia_intent::IntentParser;
use mathia_jobs::{JobEngine, JobQueue};
use mathia_llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, FallbackClient, LlmProvider,
    OpenAiClient, ProviderError,
};
use mathia_store::Store;
use mathia_workers::{
    AssistantJob, ModerationPassJob, OutboundRetryJob, ReminderDispatchJob, SummarizeJob,
    ASSISTANT_JOB, MODERATION_JOB, OUTBOUND_RETRY_JOB, REMINDER_DISPATCH_JOB, SUMMARIZE_JOB,
};

mod app;
mod auth;
mod http;
mod hub;
mod pipeline;
mod ws;

#[derive(Parser)]
#[command(name = "mathia-gateway", about = "Mathia chat gateway")]
struct Cli {
    /// Path to mathia.toml (default: ~/.mathia/mathia.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mathia_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("MATHIA_CONFIG").ok());
    let mut config = MathiaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MathiaConfig::default()
    });
    // the master key always comes from the environment in production
    if let Ok(master) = std::env::var("MATHIA_MASTER_KEY") {
        config.keystore.master_key = Some(master);
    }

    let keystore = Keystore::from_config(&config.keystore)?;
    let store = Arc::new(Store::open(&config.database.path)?);
    let cache = Arc::new(TtlCache::new());
    let limiter = Arc::new(RateLimiter::new());

    // the jobs queue lives in its own database file beside the main one
    let jobs_path = format!("{}.jobs", config.database.path);
    let jobs = JobQueue::new(rusqlite::Connection::open(&jobs_path)?)?;

    let llm = build_llm(&config);

    // the reserved assistant identity owns every ai room's replies
    let assistant_user = match store.get_user_by_username(app::ASSISTANT_USERNAME)? {
        Some(user) => user.id,
        None => {
            let pw = uuid::Uuid::new_v4().to_string();
            store
                .create_user(app::ASSISTANT_USERNAME, "assistant@mathia.local", &pw)?
                .id
        }
    };

    let mut router = build_mcp_router(&config, &store, &cache, &limiter, &jobs)?;
    // durable usage mirror behind GET /quota; windows truncate to the hour
    {
        let usage_store = store.clone();
        router.set_usage_recorder(Box::new(move |user, connector| {
            use chrono::DurationRound;
            let now = chrono::Utc::now();
            let window = now
                .duration_trunc(chrono::Duration::hours(1))
                .unwrap_or(now);
            if let Err(e) = usage_store.bump_connector_usage(user, connector, window) {
                tracing::warn!(err = %e, "usage mirror write failed");
            }
        }));
    }

    let state = Arc::new(app::AppState::new(
        config.clone(),
        store,
        keystore,
        cache.clone(),
        limiter,
        router,
        llm.clone(),
        jobs.clone(),
        assistant_user,
    ));

    // job engine: assistant fork, scheduled workers, outbound retries
    let parser = Arc::new(IntentParser::new(
        llm,
        cache.clone(),
        config.llm.model.clone(),
    ));
    let mut engine = JobEngine::new(jobs);
    engine.register(
        ASSISTANT_JOB,
        Arc::new(AssistantJob::new(state.clone(), parser)),
    );
    engine.register(
        REMINDER_DISPATCH_JOB,
        Arc::new(ReminderDispatchJob::new(state.clone())),
    );
    engine.register(
        MODERATION_JOB,
        Arc::new(ModerationPassJob::new(state.clone())),
    );
    engine.register(SUMMARIZE_JOB, Arc::new(SummarizeJob::new(state.clone())));
    engine.register(
        OUTBOUND_RETRY_JOB,
        Arc::new(OutboundRetryJob::new(state.clone())),
    );
    engine.schedule_periodic(REMINDER_DISPATCH_JOB, Duration::from_secs(60));
    engine.schedule_periodic(MODERATION_JOB, Duration::from_secs(300));
    engine.schedule_periodic(SUMMARIZE_JOB, Duration::from_secs(900));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx));

    // presence liveness sweeper, cache purge, usage-window compaction
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            sweep_state.hub.sweep_presence();
            sweep_state.cache.purge();
            let horizon = chrono::Utc::now() - chrono::Duration::hours(24);
            if let Err(e) = sweep_state.store.compact_connector_usage(horizon) {
                warn!(err = %e, "usage compaction failed");
            }
        }
    });

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("Mathia gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

fn build_mcp_router(
    config: &MathiaConfig,
    store: &Arc<Store>,
    cache: &Arc<TtlCache>,
    limiter: &Arc<RateLimiter>,
    jobs: &JobQueue,
) -> anyhow::Result<McpRouter> {
    let dispatcher = Dispatcher::new(cache.clone(), limiter.clone(), config.limits.clone());
    let mut router = McpRouter::new(dispatcher);

    let c = &config.connectors;
    let connectors: Vec<Arc<dyn mathia_connectors::Connector>> = vec![
        Arc::new(TravelConnector::new(c.travel_base_url.clone())),
        Arc::new(ItineraryConnector::new()),
        Arc::new(CalendarConnector::new(
            c.calendar_base_url.clone(),
            store.clone(),
            Vec::new(),
        )),
        Arc::new(MessagingConnector::new(
            MessagingConfig {
                whatsapp_base_url: c.whatsapp_base_url.clone(),
                whatsapp_token: c.whatsapp_token.clone(),
                mail_base_url: c.mail_base_url.clone(),
                mail_api_key: c.mail_api_key.clone(),
                daily_quota: config.limits.messaging_daily_quota,
            },
            limiter.clone(),
            jobs.clone(),
        )),
        Arc::new(WalletConnector::new(store.clone())),
        Arc::new(ReminderConnector::new(store.clone())),
        Arc::new(InfoConnector::new(
            InfoConfig {
                weather_base_url: c.weather_base_url.clone(),
                currency_base_url: c.currency_base_url.clone(),
                gif_base_url: c.gif_base_url.clone(),
                gif_api_key: c.gif_api_key.clone(),
                websearch_base_url: c.websearch_base_url.clone(),
            },
            cache.clone(),
        )),
        Arc::new(ModerationConnector::new(c.moderation_base_url.clone())),
    ];
    for connector in connectors {
        router
            .register(connector)
            .map_err(|e| anyhow::anyhow!("connector registration failed: {e}"))?;
    }

    Ok(router)
}

/// Build the provider stack from config: primary behind retries, secondary
/// tried once on 5xx/timeout. With no providers configured the assistant
/// degrades to its canned unavailable reply.
fn build_llm(config: &MathiaConfig) -> Arc<dyn LlmProvider> {
    let make = |entry: &mathia_core::config::LlmProviderConfig| -> Box<dyn LlmProvider> {
        match entry.kind.as_str() {
            "anthropic" => Box::new(AnthropicClient::new(
                entry.api_key.clone(),
                entry.base_url.clone(),
            )),
            _ => Box::new(OpenAiClient::new(
                entry.api_key.clone(),
                entry.base_url.clone(),
            )),
        }
    };

    match &config.llm.primary {
        Some(primary) => Arc::new(FallbackClient::new(
            make(primary),
            config.llm.secondary.as_ref().map(make),
            Duration::from_secs(60),
        )),
        None => {
            warn!("no LLM provider configured; assistant replies will degrade");
            Arc::new(UnconfiguredProvider)
        }
    }
}

/// Stands in when no provider is configured; every call reports
/// unavailability so the pipeline's degraded paths engage.
struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(
        &self,
        _req: &CompletionRequest,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::Unavailable(
            "no LLM provider configured".to_string(),
        ))
    }
}
