//! JWKS cache: an atomically-swappable snapshot of signing keys, loaded
//! from either inline JSON or an HTTP URI, with a bounded
//! force-refresh-on-miss.
//!
//! Grounded on the teacher's `core::auth::providers::entra::EntraProvider`
//! JWKS caching pattern (load-on-miss, refresh-on-stale), but swapped
//! from the teacher's `tokio::sync::RwLock<Option<_>>` to `arc_swap`'s
//! lock-free `ArcSwapOption` — this cache is read on every request and
//! written rarely, the textbook case for `arc-swap`.

use arc_swap::ArcSwapOption;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;

use crate::error::GatewayError;

/// Holds the current JWKS snapshot. Cloning is cheap (an `Arc` bump);
/// intended to live inside `AppState` behind an `Arc`.
pub struct JwksCache {
    source: JwksSource,
    current: ArcSwapOption<JwkSet>,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
enum JwksSource {
    Inline(String),
    Uri(String),
}

impl JwksCache {
    pub fn new(jwks_uri: Option<String>, jwks_json: Option<String>, http: reqwest::Client) -> Result<Self, GatewayError> {
        let source = match (jwks_json, jwks_uri) {
            (Some(inline), _) => JwksSource::Inline(inline),
            (None, Some(uri)) => JwksSource::Uri(uri),
            (None, None) => {
                return Err(GatewayError::internal(
                    "JWKS cache requires either jwks_json or jwks_uri",
                ));
            }
        };

        Ok(Self {
            source,
            current: ArcSwapOption::empty(),
            http,
        })
    }

    /// Returns the current snapshot, loading it for the first time if
    /// none has been fetched yet.
    pub async fn get_or_load(&self) -> Result<Arc<JwkSet>, GatewayError> {
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }
        self.refresh().await
    }

    /// Unconditionally fetches (or re-parses) the JWKS and replaces the
    /// cached snapshot, returning the fresh one.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, GatewayError> {
        let jwk_set = self.fetch().await?;
        let arc = Arc::new(jwk_set);
        self.current.store(Some(arc.clone()));
        Ok(arc)
    }

    async fn fetch(&self) -> Result<JwkSet, GatewayError> {
        match &self.source {
            JwksSource::Inline(json) => serde_json::from_str(json)
                .map_err(|e| GatewayError::internal(format!("invalid inline JWKS JSON: {e}"))),
            JwksSource::Uri(uri) => {
                let response = self
                    .http
                    .get(uri)
                    .send()
                    .await
                    .map_err(|e| GatewayError::internal(format!("failed to fetch JWKS: {e}")))?;
                response
                    .json::<JwkSet>()
                    .await
                    .map_err(|e| GatewayError::internal(format!("invalid JWKS response: {e}")))
            }
        }
    }

    /// Looks up a key by `kid`, force-refreshing exactly once if the
    /// current snapshot lacks it. Returns `None` only after the refresh
    /// also fails to find it.
    pub async fn key_for_kid(&self, kid: &str) -> Result<Option<jsonwebtoken::jwk::Jwk>, GatewayError> {
        let snapshot = self.get_or_load().await?;
        if let Some(key) = find_key(&snapshot, kid) {
            return Ok(Some(key));
        }

        let refreshed = self.refresh().await?;
        Ok(find_key(&refreshed, kid))
    }
}

fn find_key(jwk_set: &JwkSet, kid: &str) -> Option<jsonwebtoken::jwk::Jwk> {
    jwk_set
        .keys
        .iter()
        .find(|key| key.common.key_id.as_deref() == Some(kid))
        .cloned()
}
