//! Caller identity: who is making the request, as established by an outer authentication layer.

use crate::error::ConfigError;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderName},
};
use std::sync::Arc;

/// Default trusted header carrying the authenticated user name.
pub const REMOTE_USER_HEADER: &str = "X-Remote-User";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
}

impl Caller {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

/// Decides who the caller is. `None` means the request is not permitted.
pub trait CallerIdentity: Send + Sync + 'static {
    fn identify(&self, headers: &HeaderMap) -> Option<Caller>;
}

/// Identity from a header set by a trusted reverse proxy.
#[derive(Clone, Debug)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: &str) -> Result<Self, ConfigError> {
        let header = HeaderName::try_from(header)
            .map_err(|e| ConfigError::Settings(format!("invalid user header '{}': {}", header, e)))?;
        Ok(Self { header })
    }
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static("x-remote-user"),
        }
    }
}

impl CallerIdentity for HeaderIdentity {
    fn identify(&self, headers: &HeaderMap) -> Option<Caller> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Caller::new)
    }
}

/// Same answer for every request. `StaticIdentity(None)` denies everything.
#[derive(Clone, Debug)]
pub struct StaticIdentity(pub Option<String>);

impl CallerIdentity for StaticIdentity {
    fn identify(&self, _headers: &HeaderMap) -> Option<Caller> {
        self.0.as_deref().map(Caller::new)
    }
}

/// Extractor for the optional caller, resolved by the identity in router state.
#[derive(Clone, Debug)]
pub struct RequestCaller(pub Option<Caller>);

#[async_trait]
impl<S> FromRequestParts<S> for RequestCaller
where
    Arc<dyn CallerIdentity>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = Arc::<dyn CallerIdentity>::from_ref(state);
        Ok(RequestCaller(identity.identify(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_identity_trims_and_rejects_blank() {
        let identity = HeaderIdentity::default();
        let mut headers = HeaderMap::new();
        assert_eq!(identity.identify(&headers), None);
        headers.insert(REMOTE_USER_HEADER, HeaderValue::from_static("   "));
        assert_eq!(identity.identify(&headers), None);
        headers.insert(REMOTE_USER_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(identity.identify(&headers), Some(Caller::new("alice")));
    }

    #[test]
    fn custom_header_name() {
        let identity = HeaderIdentity::new("X-Forwarded-User").expect("valid header");
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("bob"));
        assert_eq!(identity.identify(&headers), Some(Caller::new("bob")));
        assert!(HeaderIdentity::new("bad header").is_err());
    }
}
