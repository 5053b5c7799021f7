//! The authorization engine: every operation of the code-with-PKCE flow.
//!
//! Each operation validates before it mutates, keeps single-use
//! semantics in the flow store, and returns the events it produced
//! instead of firing side effects inline. Callers hand those events to
//! the dispatcher once the response is committed.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AuthCode, AuthRequest, Project, ProviderKind, SanitizedEndUser, Session};
use crate::providers::FederatedProfile;
use crate::services::credentials::CredentialStore;
use crate::services::error::FlowError;
use crate::services::events::{AuthEvent, EventKind};
use crate::services::flow_store::FlowStore;
use crate::services::identity::IdentityService;
use crate::services::registry::ProjectRegistry;
use crate::services::session_store::SessionStore;
use crate::services::tokens::TokenService;
use crate::services::verification::VerificationService;
use crate::utils::{pkce, sha256_hex, RequestContext};

/// Input of [`FlowService::begin_authorize`].
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub public_key: String,
    pub redirect_uri: String,
    pub provider: String,
    pub code_challenge: String,
    pub code_challenge_method: Option<String>,
    pub state: Option<String>,
}

/// Credentials minted by exchange and refresh.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    /// Present on code exchange; refresh leaves it empty.
    pub user: Option<SanitizedEndUser>,
}

#[derive(Clone)]
pub struct FlowService {
    registry: Arc<dyn ProjectRegistry>,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    flow_store: Arc<dyn FlowStore>,
    tokens: TokenService,
    identity: IdentityService,
    verification: VerificationService,
    origin_default_deny: bool,
}

impl FlowService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        flow_store: Arc<dyn FlowStore>,
        tokens: TokenService,
        identity: IdentityService,
        verification: VerificationService,
        origin_default_deny: bool,
    ) -> Self {
        Self {
            registry,
            credentials,
            sessions,
            flow_store,
            tokens,
            identity,
            verification,
            origin_default_deny,
        }
    }

    // ==================== Authorize ====================

    /// Validate an SDK authorization attempt and store the pending
    /// request. Nothing is mutated unless every check passes.
    pub async fn begin_authorize(
        &self,
        params: AuthorizeParams,
    ) -> Result<(AuthRequest, Vec<AuthEvent>), FlowError> {
        let project = self.resolve_client(&params.public_key).await?;

        if !project.redirect_uri_registered(&params.redirect_uri) {
            return Err(FlowError::InvalidRequest(
                "redirectUri is not registered for this project".to_string(),
            ));
        }

        let provider: ProviderKind = params
            .provider
            .parse()
            .map_err(|_| FlowError::InvalidRequest("unknown provider".to_string()))?;
        if !project.provider_enabled(provider) {
            return Err(FlowError::InvalidRequest(format!(
                "provider '{}' is not enabled for this project",
                provider
            )));
        }

        if let Some(method) = params.code_challenge_method.as_deref() {
            if method != pkce::CHALLENGE_METHOD_S256 {
                return Err(FlowError::InvalidRequest(
                    "only the S256 code challenge method is supported".to_string(),
                ));
            }
        }
        if !pkce::challenge_format_ok(&params.code_challenge) {
            return Err(FlowError::InvalidRequest(
                "codeChallenge is malformed".to_string(),
            ));
        }

        let request = AuthRequest::new(
            project.project_id,
            params.public_key,
            params.redirect_uri,
            provider.as_str().to_string(),
            params.code_challenge,
            params.state,
        );
        self.flow_store.put_request(&request).await?;

        let events = vec![AuthEvent::new(
            EventKind::AuthRequestCreated,
            project.project_id,
            json!({
                "request_id": request.request_id,
                "provider": request.provider,
                "redirect_uri": request.redirect_uri,
            }),
        )];

        tracing::info!(
            project_id = %project.project_id,
            provider = %request.provider,
            "authorization request created"
        );
        Ok((request, events))
    }

    // ==================== Local provider ====================

    /// Email/password login against a pending authorization request.
    /// Unverified accounts receive a fresh OTP and a
    /// `VerificationRequired` signal; the request stays pending so the
    /// flow resumes after `verify_otp`.
    pub async fn login_local(
        &self,
        public_key: &str,
        sdk_request: &str,
        email: &str,
        password: &str,
    ) -> Result<(AuthCode, Vec<AuthEvent>), FlowError> {
        let project = self.resolve_client(public_key).await?;
        if !project.provider_enabled(ProviderKind::Local) {
            return Err(FlowError::InvalidRequest(
                "local login is not enabled for this project".to_string(),
            ));
        }

        // Peek only; the request must survive a verification detour.
        let request = self.peek_bound_request(&project, sdk_request).await?;
        if request.provider != ProviderKind::Local.as_str() {
            return Err(FlowError::InvalidRequest(
                "authorization request was not started for the local provider".to_string(),
            ));
        }

        let user = self
            .identity
            .authenticate_local(&project, email, password)
            .await?;

        if !user.is_verified {
            self.verification.issue_code(&project, &user.email).await?;
            return Err(FlowError::VerificationRequired {
                email: user.email,
                sdk_request: Some(sdk_request.to_string()),
            });
        }

        self.issue_code_for(&project, &request.request_id, user.sanitized())
            .await
    }

    /// Redeem an emailed OTP. With `sdk_request` the pending flow
    /// resumes and a code is issued; without it only the account state
    /// changes.
    pub async fn verify_otp(
        &self,
        public_key: &str,
        email: &str,
        otp: &str,
        sdk_request: Option<&str>,
    ) -> Result<(SanitizedEndUser, Option<AuthCode>, Vec<AuthEvent>), FlowError> {
        let project = self.resolve_client(public_key).await?;

        let user = self.verification.verify_code(&project, email, otp).await?;

        match sdk_request {
            Some(request_id) => {
                let request = self.peek_bound_request(&project, request_id).await?;
                let (code, events) = self
                    .issue_code_for(&project, &request.request_id, user.sanitized())
                    .await?;
                Ok((user.sanitized(), Some(code), events))
            }
            None => Ok((user.sanitized(), None, Vec::new())),
        }
    }

    /// Create the account and send the first verification code. The
    /// account cannot log in until the code is redeemed.
    pub async fn register_local(
        &self,
        public_key: &str,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Result<SanitizedEndUser, FlowError> {
        let project = self.resolve_client(public_key).await?;
        if !project.provider_enabled(ProviderKind::Local) {
            return Err(FlowError::InvalidRequest(
                "local login is not enabled for this project".to_string(),
            ));
        }

        let user = self
            .identity
            .register_local(&project, email, password, username)
            .await?;
        self.verification.issue_code(&project, &user.email).await?;

        Ok(user.sanitized())
    }

    pub async fn resend_verification(
        &self,
        public_key: &str,
        email: &str,
    ) -> Result<(), FlowError> {
        let project = self.resolve_client(public_key).await?;
        self.verification.resend(&project, email).await
    }

    // ==================== Federated provider ====================

    /// Complete a provider callback: map the upstream profile to an
    /// account and convert the pending request into a code.
    pub async fn complete_federated(
        &self,
        provider: ProviderKind,
        request_id: &str,
        profile: &FederatedProfile,
    ) -> Result<(AuthCode, Vec<AuthEvent>), FlowError> {
        let request = self
            .flow_store
            .get_request(request_id)
            .await?
            .ok_or_else(expired_request)?;
        if request.provider != provider.as_str() {
            return Err(FlowError::InvalidRequest(
                "authorization request was started for a different provider".to_string(),
            ));
        }

        let project = self
            .registry
            .resolve_by_id(request.project_id)
            .await?
            .ok_or(FlowError::UnknownClient)?;
        if !project.provider_enabled(provider) {
            return Err(FlowError::InvalidRequest(format!(
                "provider '{}' is not enabled for this project",
                provider
            )));
        }

        let user = self.identity.resolve_federated(&project, profile).await?;

        if !user.is_verified {
            self.verification.issue_code(&project, &user.email).await?;
            return Err(FlowError::VerificationRequired {
                email: user.email,
                sdk_request: Some(request_id.to_string()),
            });
        }

        self.issue_code_for(&project, request_id, user.sanitized())
            .await
    }

    /// Pending request for a federated redirect, so the handler can
    /// rebuild the provider authorize URL.
    pub async fn pending_request(&self, request_id: &str) -> Result<AuthRequest, FlowError> {
        self.flow_store
            .get_request(request_id)
            .await?
            .ok_or_else(expired_request)
    }

    // ==================== Token endpoint ====================

    /// Exchange a single-use code plus PKCE verifier for tokens. The code
    /// is consumed first; any later failure leaves it burned, which is
    /// the fail-closed direction.
    pub async fn exchange_code(
        &self,
        code: &str,
        public_key: Option<&str>,
        code_verifier: &str,
        ctx: &RequestContext,
    ) -> Result<(TokenBundle, Vec<AuthEvent>), FlowError> {
        let auth_code = self
            .flow_store
            .take_code(code)
            .await?
            .ok_or_else(|| FlowError::InvalidGrant(
                "authorization code is expired or already used".to_string(),
            ))?;

        if let Some(supplied) = public_key {
            if supplied != auth_code.public_key {
                return Err(FlowError::InvalidGrant(
                    "authorization code was issued to a different client".to_string(),
                ));
            }
        }

        if !pkce::verify_code_challenge(code_verifier, &auth_code.code_challenge) {
            return Err(FlowError::InvalidGrant(
                "PKCE verification failed".to_string(),
            ));
        }

        let project = self
            .registry
            .resolve_by_id(auth_code.project_id)
            .await?
            .ok_or(FlowError::UnknownClient)?;
        self.enforce_origin(&project, ctx)?;

        let user = auth_code.user.clone();
        let (bundle, session) = self.open_session(&user, ctx).await?;

        let events = vec![AuthEvent::new(
            EventKind::TokenExchanged,
            project.project_id,
            json!({
                "user_id": user.user_id,
                "email": user.email,
                "username": user.username,
                "provider": auth_code.provider,
                "session_id": session.session_id,
                "ip": ctx.ip,
                "user_agent": ctx.user_agent,
            }),
        )];

        tracing::info!(
            project_id = %project.project_id,
            user_id = %user.user_id,
            "authorization code exchanged"
        );
        Ok((bundle, events))
    }

    /// Rotate a refresh token. The conditional store update is the only
    /// arbiter: replays and lost races both observe zero matched rows.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<(TokenBundle, Vec<AuthEvent>), FlowError> {
        let invalid =
            || FlowError::InvalidGrant("refresh token is invalid or expired".to_string());

        let claims = self
            .tokens
            .validate_refresh_token(refresh_token)
            .map_err(|_| invalid())?;

        let old_hash = sha256_hex(refresh_token);
        let session = self
            .sessions
            .find_by_token_hash(&old_hash)
            .await?
            .ok_or_else(invalid)?;
        if !session.is_active() || session.session_id.to_string() != claims.sid {
            return Err(invalid());
        }

        let project = self
            .registry
            .resolve_by_id(session.project_id)
            .await?
            .ok_or(FlowError::UnknownClient)?;
        self.enforce_origin(&project, ctx)?;

        let user = self
            .credentials
            .find_by_id(session.user_id)
            .await?
            .ok_or_else(invalid)?;

        let new_refresh = self.tokens.generate_refresh_token(
            session.user_id,
            session.project_id,
            session.session_id,
        )?;
        let new_hash = sha256_hex(&new_refresh);
        let new_expiry = chrono::Utc::now()
            + chrono::Duration::days(self.tokens.refresh_token_expiry_days());

        let rotated = self
            .sessions
            .rotate(&old_hash, &new_hash, new_expiry)
            .await?;
        let Some(rotated) = rotated else {
            tracing::warn!(
                session_id = %session.session_id,
                user_id = %session.user_id,
                "refresh token replay detected"
            );
            return Err(invalid());
        };

        let access_token =
            self.tokens
                .generate_access_token(user.user_id, user.project_id, &user.email)?;

        let bundle = TokenBundle {
            access_token,
            refresh_token: new_refresh,
            expires_in: self.tokens.access_token_expiry_seconds(),
            user: None,
        };

        let events = vec![AuthEvent::new(
            EventKind::TokenRefreshed,
            project.project_id,
            json!({
                "user_id": user.user_id,
                "session_id": rotated.session_id,
                "ip": ctx.ip,
            }),
        )];

        Ok((bundle, events))
    }

    /// Invalidate the session behind a refresh token. Idempotent; an
    /// unknown token is not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<bool, FlowError> {
        let hash = sha256_hex(refresh_token);
        let invalidated = self.sessions.invalidate(&hash).await?;
        if invalidated {
            tracing::info!("session invalidated on logout");
        }
        Ok(invalidated)
    }

    // ==================== Shared steps ====================

    async fn resolve_client(&self, public_key: &str) -> Result<Project, FlowError> {
        if public_key.is_empty() {
            return Err(FlowError::InvalidRequest(
                "publicKey is required".to_string(),
            ));
        }
        self.registry
            .resolve_by_public_key(public_key)
            .await?
            .ok_or(FlowError::UnknownClient)
    }

    /// Peek a pending request and check it belongs to this project.
    async fn peek_bound_request(
        &self,
        project: &Project,
        request_id: &str,
    ) -> Result<AuthRequest, FlowError> {
        let request = self
            .flow_store
            .get_request(request_id)
            .await?
            .ok_or_else(expired_request)?;
        if request.project_id != project.project_id {
            return Err(expired_request());
        }
        Ok(request)
    }

    /// Atomically consume the pending request and issue its code.
    async fn issue_code_for(
        &self,
        project: &Project,
        request_id: &str,
        user: SanitizedEndUser,
    ) -> Result<(AuthCode, Vec<AuthEvent>), FlowError> {
        let request = self
            .flow_store
            .take_request(request_id)
            .await?
            .ok_or_else(expired_request)?;

        let code = AuthCode::issue(request, user);
        self.flow_store.put_code(&code).await?;

        let events = vec![AuthEvent::new(
            EventKind::AuthCodeIssued,
            project.project_id,
            json!({
                "request_id": code.request_id,
                "provider": code.provider,
                "user_id": code.user.user_id,
            }),
        )];

        tracing::info!(
            project_id = %project.project_id,
            user_id = %code.user.user_id,
            "authorization code issued"
        );
        Ok((code, events))
    }

    /// Mint a refresh session plus access token for a resolved user.
    async fn open_session(
        &self,
        user: &SanitizedEndUser,
        ctx: &RequestContext,
    ) -> Result<(TokenBundle, Session), FlowError> {
        let session_id = Uuid::new_v4();
        let refresh_token =
            self.tokens
                .generate_refresh_token(user.user_id, user.project_id, session_id)?;

        let mut session = Session::new(
            user.user_id,
            user.project_id,
            sha256_hex(&refresh_token),
            self.tokens.refresh_token_expiry_days(),
            ctx.ip.clone(),
            ctx.user_agent.clone(),
        );
        session.session_id = session_id;
        self.sessions.insert(&session).await?;

        let access_token =
            self.tokens
                .generate_access_token(user.user_id, user.project_id, &user.email)?;

        let bundle = TokenBundle {
            access_token,
            refresh_token,
            expires_in: self.tokens.access_token_expiry_seconds(),
            user: Some(user.clone()),
        };
        Ok((bundle, session))
    }

    /// Browser origin enforcement. No Origin header means a non-browser
    /// caller and passes; an empty allowlist passes unless the deployment
    /// opts into default-deny.
    fn enforce_origin(&self, project: &Project, ctx: &RequestContext) -> Result<(), FlowError> {
        let Some(origin) = &ctx.origin else {
            return Ok(());
        };

        if project.allowed_origins.is_empty() {
            if self.origin_default_deny {
                return Err(FlowError::OriginDenied);
            }
            return Ok(());
        }

        if project.origin_allowed(origin) {
            Ok(())
        } else {
            Err(FlowError::OriginDenied)
        }
    }
}

fn expired_request() -> FlowError {
    FlowError::InvalidGrant("authorization request is unknown or expired".to_string())
}
