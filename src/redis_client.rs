use redis::{
    aio::{MultiplexedConnection, PubSub},
    Client, RedisResult,
};
use tracing::info;

/// Подключение к Redis: холды, idempotency-ключи и межпроцессная раздача.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        // Холды fail-closed, поэтому недоступный Redis лучше увидеть на старте
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        info!("Redis connection verified");
        Ok(RedisClient { client, conn })
    }

    /// Отдельное соединение под подписку: multiplexed не умеет SUBSCRIBE.
    pub async fn pubsub(&self) -> RedisResult<PubSub> {
        self.client.get_async_pubsub().await
    }
}
