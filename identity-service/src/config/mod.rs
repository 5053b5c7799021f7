use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// Externally reachable base URL, used to build provider callback URLs.
    pub public_base_url: String,
    /// Hosted login page end users are sent to for the local provider.
    pub local_login_url: String,
    pub database: DatabaseConfig,
    pub flow: FlowConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub smtp: SmtpConfig,
    pub providers: ProvidersConfig,
    pub security: SecurityConfig,
    pub webhook: WebhookConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub backend: FlowStoreBackend,
    pub redis_url: Option<String>,
    pub auth_request_ttl_seconds: u64,
    pub auth_code_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub expiry_seconds: i64,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub google: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
    pub discord: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Service-level CORS allowlist, distinct from the per-project origin
    /// check applied at token exchange.
    pub allowed_origins: Vec<String>,
    /// When true, token exchange/refresh carrying an Origin header is refused
    /// unless the project explicitly allowlists it (empty allowlist denies).
    pub origin_default_deny: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Authenticated,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub otp_attempts: u32,
    pub otp_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        // Container platforms inject a bare PORT; let it win over the
        // config-file/APP_PORT default.
        if let Ok(port) = env::var("PORT") {
            common_config.port = port
                .parse()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("PORT: {}", e)))?;
        }

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:8080"), is_prod)?,
            local_login_url: get_env(
                "LOCAL_LOGIN_URL",
                Some("http://localhost:3000/auth/login"),
                is_prod,
            )?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            flow: FlowConfig {
                backend: get_env("FLOW_STORE", Some("memory"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                redis_url: env::var("REDIS_URL").ok(),
                auth_request_ttl_seconds: parse_env(
                    "AUTH_REQUEST_TTL_SECONDS",
                    Some("600"),
                    is_prod,
                )?,
                auth_code_ttl_seconds: parse_env("AUTH_CODE_TTL_SECONDS", Some("300"), is_prod)?,
                sweep_interval_seconds: parse_env("FLOW_SWEEP_INTERVAL_SECONDS", Some("60"), is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: get_env("JWT_ACCESS_SECRET", None, is_prod)?,
                refresh_secret: get_env("JWT_REFRESH_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
            },
            otp: OtpConfig {
                expiry_seconds: parse_env("OTP_EXPIRY_SECONDS", Some("300"), is_prod)?,
                max_attempts: parse_env("OTP_MAX_ATTEMPTS", Some("5"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                username: get_env("SMTP_USERNAME", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_address: get_env(
                    "SMTP_FROM_ADDRESS",
                    Some("no-reply@localhost"),
                    is_prod,
                )?,
            },
            providers: ProvidersConfig {
                google: oauth_client_from_env("GOOGLE"),
                github: oauth_client_from_env("GITHUB"),
                discord: oauth_client_from_env("DISCORD"),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                origin_default_deny: get_env("ORIGIN_DEFAULT_DENY", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
            },
            webhook: WebhookConfig {
                timeout_seconds: parse_env("WEBHOOK_TIMEOUT_SECONDS", Some("5"), is_prod)?,
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("10"), is_prod)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", Some("5"), is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                otp_attempts: parse_env("RATE_LIMIT_OTP_ATTEMPTS", Some("10"), is_prod)?,
                otp_window_seconds: parse_env(
                    "RATE_LIMIT_OTP_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.flow.auth_request_ttl_seconds == 0 || self.flow.auth_code_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "flow TTLs must be positive"
            )));
        }

        if self.flow.backend == FlowStoreBackend::Redis && self.flow.redis_url.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REDIS_URL is required when FLOW_STORE=redis"
            )));
        }

        if self.environment == Environment::Prod {
            if self.jwt.access_secret.len() < 32 || self.jwt.refresh_secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT secrets must be at least 32 bytes in production"
                )));
            }

            if self.jwt.access_secret == self.jwt.refresh_secret {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT access and refresh secrets must differ"
                )));
            }

            if !self.public_base_url.starts_with("https://") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "PUBLIC_BASE_URL must be https in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider using 'authenticated' or 'disabled'");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!(format!("{}: {}", key, e)))
    })
}

/// Provider adapters are enabled by setting `<PREFIX>_CLIENT_ID` and
/// `<PREFIX>_CLIENT_SECRET`; an unset pair simply disables the adapter.
fn oauth_client_from_env(prefix: &str) -> Option<OAuthClientConfig> {
    let client_id = env::var(format!("{}_CLIENT_ID", prefix)).ok()?;
    let client_secret = env::var(format!("{}_CLIENT_SECRET", prefix)).ok()?;
    Some(OAuthClientConfig {
        client_id,
        client_secret,
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for FlowStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(FlowStoreBackend::Memory),
            "redis" => Ok(FlowStoreBackend::Redis),
            _ => Err(format!("Invalid flow store backend: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "authenticated" => Ok(SwaggerMode::Authenticated),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
