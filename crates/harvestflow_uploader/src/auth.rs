//! Bearer-token acquisition and caching (`spec.md` §4.6). Token fetches go
//! through the Rate Governor's app-wide window like every other outgoing
//! call the uploader makes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use harvestflow_governor::{backoff_delay, RateGovernor};
use harvestflow_protocol::HasErrorKind;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::transport::BitableTransport;

/// Tokens are cached until `expiry - 30s`; a cache miss triggers renewal
/// (`spec.md` §4.6).
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(30);
/// Token renewal retries transient errors up to this many attempts before
/// giving up (`spec.md` §4.6, "up to N attempts").
const TOKEN_RETRY_MAX: u32 = 3;

struct CachedToken {
    token: String,
    valid_until: Instant,
}

pub struct TokenCache {
    app_id: String,
    app_secret: String,
    governor: Arc<RateGovernor>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>, governor: Arc<RateGovernor>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            governor,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, fetching/refreshing it if the cache is
    /// empty or within the expiry safety margin.
    pub async fn get(&self, transport: &dyn BitableTransport) -> Result<String, UploadError> {
        {
            let guard = self.cached.lock().await;
            if let Some(cached) = guard.as_ref() {
                if Instant::now() < cached.valid_until {
                    return Ok(cached.token.clone());
                }
            }
        }
        self.refresh(transport).await
    }

    /// Forces a renewal, discarding whatever was cached. Called directly
    /// after an `AuthExpired` response so the caller can retry without
    /// counting the refresh itself toward `maxRetries` (`spec.md` §4.6).
    pub async fn refresh(&self, transport: &dyn BitableTransport) -> Result<String, UploadError> {
        let mut attempt = 0u32;
        loop {
            self.governor.acquire_app().await;
            let result = transport.fetch_token(&self.app_id, &self.app_secret).await;
            self.governor.record_app().await;

            match result {
                Ok(resp) => {
                    let ttl = Duration::from_secs(resp.expires_in_secs.max(0) as u64)
                        .saturating_sub(EXPIRY_SAFETY_MARGIN);
                    let mut guard = self.cached.lock().await;
                    *guard = Some(CachedToken {
                        token: resp.token.clone(),
                        valid_until: Instant::now() + ttl,
                    });
                    info!("refreshed tenant access token");
                    return Ok(resp.token);
                }
                Err(err) if err.kind().is_retryable() && attempt + 1 < TOKEN_RETRY_MAX => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    warn!(attempt, ?delay, error = %err, "token fetch failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
