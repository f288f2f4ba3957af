use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Client for the token liveness cache.
///
/// The auth service writes each manager's current token under
/// `manager_token:<manager-id>`; a token is live only while the cache
/// holds exactly that string. Signature validation alone cannot tell a
/// revoked token from a live one.
#[derive(Clone)]
pub struct TokenCache {
    conn: ConnectionManager,
}

impl TokenCache {
    /// Connect to the cache and verify it is reachable.
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        info!("Connecting to Redis at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Successfully connected to Redis");
        Ok(Self { conn })
    }

    /// Check that the presented token is the manager's current one.
    ///
    /// Absence, mismatch, and cache errors all read as not live.
    pub async fn verify(&self, manager_id: Uuid, token: &str) -> bool {
        let key = format!("manager_token:{}", manager_id);
        debug!("Checking token in Redis for manager {}", manager_id);

        let mut conn = self.conn.clone();
        let stored: Option<String> = match conn.get(&key).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Redis error while checking token: {}", e);
                return false;
            }
        };

        match stored {
            Some(stored) if stored == token => {
                debug!("Token validated from Redis for manager {}", manager_id);
                true
            }
            Some(_) => {
                warn!("Token mismatch in Redis for manager {}", manager_id);
                false
            }
            None => {
                warn!("Token not found in Redis for manager {}", manager_id);
                false
            }
        }
    }
}
