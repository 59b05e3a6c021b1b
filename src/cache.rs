use crate::models::Movie;
use crate::{database::Database, redis_client::RedisClient};
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

// TTL кеша, секунды
const CATALOG_TTL: u64 = 3600;
const SEATS_TTL: u64 = 60;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    // === Ключи ===

    pub fn movies_key(genre: Option<&str>, language: Option<&str>) -> String {
        format!(
            "movies:g={}&l={}",
            genre.unwrap_or("all"),
            language.unwrap_or("all")
        )
    }

    pub fn showtimes_key(movie_id: Uuid, date: Option<&str>, cinema_id: Option<&str>) -> String {
        format!(
            "showtimes:{}:d={}&c={}",
            movie_id,
            date.unwrap_or("all"),
            cinema_id.unwrap_or("all")
        )
    }

    pub fn seats_key(showtime_id: Uuid) -> String {
        format!("seats:{}", showtime_id)
    }

    // Прогрев кеша при старте
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        if let Ok(movies) = sqlx::query_as::<_, Movie>("SELECT * FROM movies ORDER BY title")
            .fetch_all(&self.db.pool)
            .await
        {
            info!("Loaded {} movies", movies.len());
            if let Ok(json) = serde_json::to_string(&movies) {
                let _ = self
                    .cache_json(&Self::movies_key(None, None), &json, CATALOG_TTL)
                    .await;
            }
        }

        info!("Cache warmup done");
    }

    // === Общие операции ===

    pub async fn get_cached_json(&self, key: &str) -> Option<String> {
        let mut conn = self.redis.conn.clone();
        conn.get(key).await.ok()
    }

    pub async fn cache_json(
        &self,
        key: &str,
        json: &str,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, json, ttl_seconds).await
    }

    pub async fn cache_catalog(&self, key: &str, json: &str) {
        if let Err(e) = self.cache_json(key, json, CATALOG_TTL).await {
            tracing::warn!("Failed to cache {}: {:?}", key, e);
        }
    }

    pub async fn cache_seats(&self, showtime_id: Uuid, json: &str) {
        let key = Self::seats_key(showtime_id);
        if let Err(e) = self.cache_json(&key, json, SEATS_TTL).await {
            tracing::warn!("Failed to cache {}: {:?}", key, e);
        }
    }

    // Инвалидировать кеш карты зала после любой смены состояния мест
    pub async fn invalidate_seats(&self, showtime_id: Uuid) {
        let key = Self::seats_key(showtime_id);
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(&key).await;
        info!("Invalidated seats cache for showtime {}", showtime_id);
    }

    // Инвалидировать расписание фильма после создания сеанса
    pub async fn invalidate_showtimes(&self, movie_id: Uuid) {
        let pattern = format!("showtimes:{}:*", movie_id);
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = match redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
        {
            Ok(keys) => keys,
            Err(_) => return,
        };
        if !keys.is_empty() {
            let _: Result<(), _> = conn.del(keys).await;
        }
    }
}
