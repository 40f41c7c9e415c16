//! Custom Axum Extractors
//!
//! Request extractors for caller identity, client address and bodies that
//! reject into the API error envelope instead of axum's plain-text defaults.

use std::net::{IpAddr, SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Query, Request},
    http::{header, request::Parts, StatusCode},
    Json,
};
use mycelio_auth::{extract_client_ip, forwarded_client_ip, AuthenticatedAgent, RateTier};
use mycelio_types::TaskId;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Caller Extractor
// =============================================================================

/// Who is calling: client address plus the raw `Authorization` header
///
/// Extraction never fails and never touches the credential store, so handlers
/// can charge the rate limit before paying for credential verification.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Rate-limit identifier; honours forwarding headers
    pub ip: String,
    /// Socket peer address
    pub peer: Option<IpAddr>,
    /// Address claimed by forwarding headers, if it parses
    pub forwarded: Option<IpAddr>,
    authorization: Option<String>,
}

impl Caller {
    /// Charge one request against `tier`
    pub async fn throttle(&self, state: &AppState, tier: RateTier) -> ApiResult<()> {
        state.throttle(tier, &self.ip).await
    }

    /// Charge `tier`, then verify the bearer credential
    pub async fn authenticate(&self, state: &AppState, tier: RateTier) -> ApiResult<AuthenticatedAgent> {
        self.throttle(state, tier).await?;
        let agent = state
            .authenticator
            .authenticate_header(self.authorization.as_deref())
            .await?;
        Ok(agent)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Caller {
            ip: extract_client_ip(&parts.headers, peer),
            peer: peer.map(|addr| addr.ip()),
            forwarded: forwarded_client_ip(&parts.headers).and_then(|ip| ip.parse().ok()),
            authorization: parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}

// =============================================================================
// Body and Query Extractors
// =============================================================================

/// JSON body extractor with enveloped rejections
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(ApiError::BodyTooLarge)
            }
            Err(rejection) => Err(ApiError::InvalidRequest(rejection.body_text())),
        }
    }
}

/// Query string extractor with enveloped rejections
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))
    }
}

/// Parse a task id path segment
pub fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::InvalidRequest(format!("Malformed task id: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn test_caller_prefers_forwarded_header() {
        let request = HttpRequest::builder()
            .uri("/")
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
            .header("Authorization", "Bearer sk-myc_x")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        parts
            .extensions
            .insert(ConnectInfo("127.0.0.1:9000".parse::<SocketAddr>().unwrap()));

        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller.ip, "203.0.113.9");
        assert_eq!(caller.peer, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(caller.forwarded, Some("203.0.113.9".parse().unwrap()));
        assert_eq!(caller.authorization(), Some("Bearer sk-myc_x"));
    }

    #[tokio::test]
    async fn test_caller_falls_back_to_peer() {
        let (mut parts, _) = HttpRequest::builder().uri("/").body(()).unwrap().into_parts();
        parts
            .extensions
            .insert(ConnectInfo("192.0.2.4:9000".parse::<SocketAddr>().unwrap()));

        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller.ip, "192.0.2.4");
        assert_eq!(caller.forwarded, None);
        assert_eq!(caller.authorization(), None);
    }

    #[test]
    fn test_parse_task_id() {
        let id = TaskId::new();
        assert_eq!(parse_task_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_task_id("not-a-uuid"), Err(ApiError::InvalidRequest(_))));
    }
}
