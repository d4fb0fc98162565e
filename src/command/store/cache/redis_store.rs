use crate::command::store::cache::{CacheBackend, CacheError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, ConnectionInfo};
use std::time::Duration;

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn new(connection: ConnectionInfo) -> Result<Self, CacheError> {
        let client = Client::open(connection)?;

        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();

        let value: Option<String> = connection.get(key).await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();

        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);

                connection.set_ex::<_, _, ()>(key, value, seconds).await?;
            }
            None => {
                connection.set::<_, _, ()>(key, value).await?;
            }
        }

        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();

        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut connection)
            .await?;

        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();

        connection.del::<_, ()>(key).await?;

        Ok(())
    }

    fn box_clone(&self) -> Box<dyn CacheBackend> {
        Box::new(self.clone())
    }
}
