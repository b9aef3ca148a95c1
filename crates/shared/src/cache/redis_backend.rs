use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::CacheError;
use super::backend::{CacheBackend, CacheFuture};

#[derive(Clone)]
pub struct RedisCacheBackend {
    connection: ConnectionManager,
}

impl RedisCacheBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await
            .map_err(|err| CacheError::Unavailable(format!("failed to connect to redis: {err}")))?;

        Ok(Self { connection })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let raw: Option<String> = connection.get(key).await?;
            Ok(raw)
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let _: i64 = connection.del(key).await?;
            Ok(())
        })
    }

    fn ping<'a>(&'a self) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            redis::cmd("PING")
                .query_async::<String>(&mut connection)
                .await?;
            Ok(())
        })
    }
}
