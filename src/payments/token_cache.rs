use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::payments::types::AuthToken;

/// Refresh this long before the gateway's own expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth token owned by a single gateway adapter instance.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: RwLock<Option<AuthToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, now: DateTime<Utc>) -> Option<AuthToken> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .filter(|token| now + Duration::seconds(EXPIRY_SKEW_SECS) < token.expires_at)
            .cloned()
    }

    pub async fn store(&self, token: AuthToken) {
        *self.inner.write().await = Some(token);
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: DateTime<Utc>) -> AuthToken {
        AuthToken {
            access_token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn returns_fresh_token_only() {
        let cache = TokenCache::new();
        let now = Utc::now();
        assert!(cache.get(now).await.is_none());

        cache.store(token(now + Duration::minutes(20))).await;
        assert_eq!(cache.get(now).await.map(|t| t.access_token), Some("abc".to_string()));

        // inside the skew window counts as expired
        cache.store(token(now + Duration::seconds(30))).await;
        assert!(cache.get(now).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_token() {
        let cache = TokenCache::new();
        let now = Utc::now();
        cache.store(token(now + Duration::hours(1))).await;
        cache.invalidate().await;
        assert!(cache.get(now).await.is_none());
    }
}
