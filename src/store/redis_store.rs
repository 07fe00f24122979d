//! Redis-backed store.
//!
//! Uses a single multiplexed connection shared by all requests. The
//! conditional write runs as a Lua script so the compare and the set happen
//! atomically on the server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{KeyValueStore, StoreError};

/// KEYS[1] = key, ARGV[1] = "1" if a value is expected, ARGV[2] = expected, ARGV[3] = new value.
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then
    return 0
  end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A [`KeyValueStore`] backed by a Redis server.
pub struct RedisStore {
    connection: MultiplexedConnection,
    cas_script: Script,
}

impl RedisStore {
    /// Open a multiplexed connection to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!(url = %url, "Connected to redis store");

        Ok(Self {
            connection,
            cas_script: Script::new(COMPARE_AND_SET_SCRIPT),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let has_expected = if expected.is_some() { "1" } else { "0" };

        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(has_expected)
            .arg(expected.unwrap_or_default())
            .arg(value)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, swapped = swapped == 1, "Redis compare-and-set");
        Ok(swapped == 1)
    }
}
