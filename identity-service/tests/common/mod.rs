//! Shared helpers for identity-service integration tests.
//!
//! Tests run hermetically: a static project registry, in-memory
//! credential/session/flow stores, a mock mailer that captures OTP codes
//! and a recording event sink. Requests still travel the full router
//! stack, middleware included.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, FlowConfig, FlowStoreBackend, IdentityConfig, JwtConfig,
        OtpConfig, ProvidersConfig, RateLimitConfig, SecurityConfig, SmtpConfig, SwaggerConfig,
        SwaggerMode, WebhookConfig,
    },
    models::Project,
    providers::ProviderSet,
    services::{
        EventDispatcher, EventSink, FlowService, IdentityService, MemoryCredentialStore,
        MemoryFlowStore, MemorySessionStore, MockMailer, RecordingSink, StaticProjectRegistry,
        TokenService, VerificationService,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;

pub const PUBLIC_KEY: &str = "pk_test_primary";
pub const REDIRECT_URI: &str = "https://app.test/callback";

/// RFC 7636 appendix B verifier; its S256 challenge is derived on demand.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        public_base_url: "http://localhost:8080".to_string(),
        local_login_url: "https://login.test/auth/login".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        flow: FlowConfig {
            backend: FlowStoreBackend::Memory,
            redis_url: None,
            auth_request_ttl_seconds: 600,
            auth_code_ttl_seconds: 300,
            sweep_interval_seconds: 0,
        },
        jwt: JwtConfig {
            access_secret: "access-secret-used-only-in-tests-0123".to_string(),
            refresh_secret: "refresh-secret-used-only-in-tests-012".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        otp: OtpConfig {
            expiry_seconds: 300,
            max_attempts: 5,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            username: String::new(),
            password: String::new(),
            from_address: "no-reply@localhost".to_string(),
        },
        providers: ProvidersConfig {
            google: None,
            github: None,
            discord: None,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            origin_default_deny: false,
        },
        webhook: WebhookConfig { timeout_seconds: 1 },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            otp_attempts: 1000,
            otp_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        otlp_endpoint: None,
    }
}

pub fn test_project() -> Project {
    Project {
        project_id: Uuid::new_v4(),
        name: "test-project".to_string(),
        public_key: PUBLIC_KEY.to_string(),
        private_key: "sk_test_primary".to_string(),
        redirect_uris: vec![REDIRECT_URI.to_string()],
        enabled_providers: vec!["local".to_string(), "google".to_string()],
        allowed_origins: vec![],
        webhook_urls: vec![],
        verification_template: None,
        created_utc: chrono::Utc::now(),
    }
}

/// A fully wired app over in-memory stores.
pub struct TestApp {
    pub router: Router,
    pub mailer: Arc<MockMailer>,
    pub events: Arc<RecordingSink>,
    pub project: Project,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config(), test_project(), ProviderSet::default()).await
}

pub async fn spawn_app_with(
    config: IdentityConfig,
    project: Project,
    providers: ProviderSet,
) -> TestApp {
    let registry = Arc::new(StaticProjectRegistry::new(vec![project.clone()]));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let flow_store = Arc::new(MemoryFlowStore::new(
        config.flow.auth_request_ttl_seconds as i64,
        config.flow.auth_code_ttl_seconds as i64,
    ));
    let mailer = Arc::new(MockMailer::new());
    let recording = Arc::new(RecordingSink::new());

    let tokens = TokenService::new(&config.jwt);
    let identity = IdentityService::new(credentials.clone());
    let verification =
        VerificationService::new(credentials.clone(), mailer.clone(), config.otp.clone());

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

    let events = EventDispatcher::new(
        vec![recording.clone() as Arc<dyn EventSink>],
        Duration::from_secs(1),
    );

    let state = AppState {
        config: config.clone(),
        flows,
        events,
        providers,
        registry,
        flow_store,
        login_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        ),
        register_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.register_attempts,
            config.rate_limit.register_window_seconds,
        ),
        otp_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.otp_attempts,
            config.rate_limit.otp_window_seconds,
        ),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
    };

    let router = build_router(state).await.expect("Failed to build router");

    TestApp {
        router,
        mailer,
        events: recording,
        project,
    }
}

impl TestApp {
    /// POST a JSON body through the full middleware stack.
    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Like [`post_json`] but with extra request headers.
    pub async fn post_json_with_headers(
        &self,
        uri: &str,
        body: serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Run the register -> OTP -> verify sequence so the account can log
    /// in without tripping the verification gate.
    pub async fn register_verified_user(&self, email: &str, password: &str) {
        let response = self
            .post_json(
                "/sdk/register",
                serde_json::json!({
                    "publicKey": PUBLIC_KEY,
                    "email": email,
                    "password": password,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let otp = self
            .mailer
            .last_code_for(email)
            .expect("registration should have mailed a code");
        let response = self
            .post_json(
                "/sdk/verify-otp",
                serde_json::json!({
                    "publicKey": PUBLIC_KEY,
                    "email": email,
                    "otp": otp,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// Begin an authorization attempt for the given provider and return
    /// the sdk_request id parsed out of the redirect target.
    pub async fn begin_authorize(&self, provider: &str) -> String {
        let uri = authorize_uri(provider, &derive_challenge(VERIFIER), Some("test-state"));
        let response = self.get(&uri).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = location_header(&response);
        query_param(&location, "sdk_request")
            .expect("authorize redirect should carry sdk_request")
    }

    /// Full happy path up to an issued authorization code.
    pub async fn issue_code(&self, email: &str, password: &str) -> String {
        self.register_verified_user(email, password).await;
        let sdk_request = self.begin_authorize("local").await;

        let response = self
            .post_json(
                "/sdk/login-local",
                serde_json::json!({
                    "publicKey": PUBLIC_KEY,
                    "sdk_request": sdk_request,
                    "email": email,
                    "password": password,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        body["code"].as_str().expect("login should issue a code").to_string()
    }
}

pub fn authorize_uri(provider: &str, challenge: &str, state: Option<&str>) -> String {
    let mut uri = format!(
        "/sdk/authorize?publicKey={}&redirectUri={}&provider={}&codeChallenge={}&codeChallengeMethod=S256",
        PUBLIC_KEY,
        urlencoding::encode(REDIRECT_URI),
        provider,
        challenge,
    );
    if let Some(state) = state {
        uri.push_str("&state=");
        uri.push_str(&urlencoding::encode(state));
    }
    uri
}

pub fn derive_challenge(verifier: &str) -> String {
    identity_service::utils::pkce::derive_challenge(verifier)
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location_header(response: &Response<Body>) -> String {
    response
        .headers()
        .get(axum::http::header::LOCATION)
        .expect("response should be a redirect")
        .to_str()
        .unwrap()
        .to_string()
}

/// Value of a query parameter in a URL, percent-decoded.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs.into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
}
