use identity_service::{
    build_router,
    config::{Environment, FlowStoreBackend, IdentityConfig},
    providers::ProviderSet,
    services::{
        ChannelSink, Database, EventDispatcher, EventSink, FlowService, FlowStore, IdentityService,
        MemoryFlowStore, RedisFlowStore, SmtpMailer, TokenService, VerificationService,
        WebhookSink,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    dotenvy::dotenv().ok();
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    identity_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    tracing::info!("Initializing database connection");
    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized successfully");

    let flow_store: Arc<dyn FlowStore> = match config.flow.backend {
        FlowStoreBackend::Memory => {
            if config.environment == Environment::Prod {
                tracing::warn!(
                    "FLOW_STORE=memory in production: pending requests and codes are lost on restart and not shared across replicas"
                );
            }
            Arc::new(MemoryFlowStore::new(
                config.flow.auth_request_ttl_seconds as i64,
                config.flow.auth_code_ttl_seconds as i64,
            ))
        }
        FlowStoreBackend::Redis => {
            let url = config.flow.redis_url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("REDIS_URL is required when FLOW_STORE=redis"))
            })?;
            Arc::new(
                RedisFlowStore::connect(
                    url,
                    config.flow.auth_request_ttl_seconds as i64,
                    config.flow.auth_code_ttl_seconds as i64,
                )
                .await?,
            )
        }
    };
    tracing::info!(backend = ?config.flow.backend, "Flow store initialized");

    let registry: Arc<dyn identity_service::services::ProjectRegistry> = Arc::new(db.clone());
    let credentials: Arc<dyn identity_service::services::CredentialStore> = Arc::new(db.clone());
    let sessions: Arc<dyn identity_service::services::SessionStore> = Arc::new(db.clone());

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    tracing::info!("Mailer initialized");

    let tokens = TokenService::new(&config.jwt);
    let identity = IdentityService::new(credentials.clone());
    let verification = VerificationService::new(credentials.clone(), mailer, config.otp.clone());

    let channel_sink = Arc::new(ChannelSink::new(EVENT_CHANNEL_CAPACITY));
    let webhook_sink = Arc::new(WebhookSink::new(
        Duration::from_secs(config.webhook.timeout_seconds),
        registry.clone(),
    )?);
    let sinks: Vec<Arc<dyn EventSink>> = vec![channel_sink, webhook_sink];
    let events = EventDispatcher::new(
        sinks,
        Duration::from_secs(config.webhook.timeout_seconds),
    );
    tracing::info!("Event dispatcher initialized: channel and webhook sinks");

    let flows = FlowService::new(
        registry.clone(),
        credentials,
        sessions,
        flow_store.clone(),
        tokens,
        identity,
        verification,
        config.security.origin_default_deny,
    );

    let providers = ProviderSet::from_config(
        &config.providers,
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("http client: {}", e)))?,
    );

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );
    let otp_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.otp_attempts,
        config.rate_limit.otp_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login, Register, OTP, and Global IP");

    // Memory backends have no native expiry; evict on a timer so
    // abandoned flows do not accumulate.
    let sweep_interval = config.flow.sweep_interval_seconds;
    if sweep_interval > 0 {
        let sweeper = flow_store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sweeper.sweep().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "swept expired flow entries"),
                    Err(e) => tracing::warn!(error = ?e, "flow store sweep failed"),
                }
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        flows,
        events,
        providers,
        registry,
        flow_store,
        login_rate_limiter,
        register_rate_limiter,
        otp_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
