use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: Client,
    /// user id -> account role, so auth does not hit the database per request.
    pub principal_cache: Cache<String, String>,
    /// partner id -> resolved commission percentage.
    pub commission_cache: Cache<String, f64>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let principal_cache = Cache::builder()
            .max_capacity(config.principal_cache_max_entries)
            .time_to_live(Duration::from_secs(config.principal_cache_ttl_seconds))
            .build();

        let commission_cache = Cache::builder()
            .max_capacity(config.commission_cache_max_entries)
            .time_to_live(Duration::from_secs(config.commission_cache_ttl_seconds))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            principal_cache,
            commission_cache,
        })
    }
}
