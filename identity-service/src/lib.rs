pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::ip_rate_limit_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig, SwaggerMode};
use crate::middleware::metrics_middleware;
use crate::providers::ProviderSet;
use crate::services::{EventDispatcher, FlowService, FlowStore, ProjectRegistry};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::authorize::authorize,
        handlers::local::register,
        handlers::local::login_local,
        handlers::local::verify_otp,
        handlers::local::resend_verification,
        handlers::token::token,
        handlers::token::refresh,
        handlers::token::logout,
        handlers::federated::provider_redirect,
        handlers::federated::provider_callback,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginLocalRequest,
            dtos::auth::VerifyOtpRequest,
            dtos::auth::VerifyOtpResponse,
            dtos::auth::ResendVerificationRequest,
            dtos::auth::TokenRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::TokenResponse,
            dtos::auth::IssuedCodeResponse,
            dtos::auth::MessageResponse,
            dtos::auth::VerificationRequiredResponse,
            models::SanitizedEndUser,
        )
    ),
    tags(
        (name = "Authorization", description = "Authorization request intake"),
        (name = "Local Provider", description = "Email/password accounts and verification"),
        (name = "Token", description = "Code exchange, rotation and logout"),
        (name = "Federated", description = "Upstream provider redirect legs"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub flows: FlowService,
    pub events: EventDispatcher,
    pub providers: ProviderSet,
    pub registry: Arc<dyn ProjectRegistry>,
    pub flow_store: Arc<dyn FlowStore>,
    pub login_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub register_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub otp_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub ip_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Credential-guessing surfaces get their own, tighter limiters.
    let login_limiter = state.login_rate_limiter.clone();
    let login_route = Router::new()
        .route("/sdk/login-local", post(handlers::local::login_local))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    let register_limiter = state.register_rate_limiter.clone();
    let register_route = Router::new()
        .route("/sdk/register", post(handlers::local::register))
        .layer(from_fn_with_state(
            register_limiter,
            ip_rate_limit_middleware,
        ));

    let otp_limiter = state.otp_rate_limiter.clone();
    let otp_routes = Router::new()
        .route("/sdk/verify-otp", post(handlers::local::verify_otp))
        .route(
            "/sdk/resend-verification",
            post(handlers::local::resend_verification),
        )
        .layer(from_fn_with_state(otp_limiter, ip_rate_limit_middleware));

    let ip_limiter = state.ip_rate_limiter.clone();

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    // Only add Swagger UI if enabled in config
    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => match state.config.swagger.enabled {
            SwaggerMode::Public | SwaggerMode::Authenticated => true,
            SwaggerMode::Disabled => false,
        },
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        // Keep the OpenAPI JSON available for programmatic access
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().unwrap_or_else(|e| {
                tracing::error!("Invalid CORS origin '{}': {}. Using fallback.", o, e);
                HeaderValue::from_static("*")
            })
        })
        .collect::<Vec<HeaderValue>>();

    let app = app
        .route("/sdk/authorize", get(handlers::authorize::authorize))
        .route("/sdk/token", post(handlers::token::token))
        .route("/sdk/refresh", post(handlers::token::refresh))
        .route("/sdk/logout", post(handlers::token::logout))
        .route(
            "/auth/:provider",
            get(handlers::federated::provider_redirect),
        )
        .route(
            "/auth/:provider/callback",
            get(handlers::federated::provider_callback),
        )
        .merge(login_route)
        .merge(register_route)
        .merge(otp_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        // Add CORS layer
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.registry.health_check().await.map_err(|e| {
        tracing::error!(error = ?e, "project registry health check failed");
        e
    })?;

    state.flow_store.health_check().await.map_err(|e| {
        tracing::error!(error = ?e, "flow store health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "registry": "up",
            "flow_store": "up"
        }
    })))
}
