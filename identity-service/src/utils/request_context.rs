use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::net::SocketAddr;

/// Immutable per-request metadata, captured once at extraction and passed
/// explicitly to the operations that record or enforce it. Never read
/// from ambient state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn new(ip: Option<String>, user_agent: Option<String>, origin: Option<String>) -> Self {
        Self {
            ip,
            user_agent,
            origin,
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // First hop of x-forwarded-for when behind a proxy, else the
        // socket peer address.
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        });

        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let origin = parts
            .headers
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(RequestContext {
            ip,
            user_agent,
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> RequestContext {
        let (mut parts, _) = req.into_parts();
        RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn forwarded_for_takes_first_hop() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("user-agent", "test-agent")
            .header("origin", "https://app.example.com")
            .body(())
            .unwrap();

        let ctx = extract(req).await;
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(ctx.origin.as_deref(), Some("https://app.example.com"));
    }

    #[tokio::test]
    async fn falls_back_to_connect_info() {
        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.9:4312".parse::<SocketAddr>().unwrap()));

        let ctx = extract(req).await;
        assert_eq!(ctx.ip.as_deref(), Some("192.0.2.9"));
        assert!(ctx.user_agent.is_none());
        assert!(ctx.origin.is_none());
    }
}
