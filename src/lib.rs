pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod pricing;
pub mod redis_client;
pub mod services;

use std::sync::Arc;

use services::payment::PaymentGatewayClient;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    // Клиент шлюза живёт в состоянии, а не создаётся на запрос:
    // Circuit Breaker должен накапливать сбои между запросами
    pub payments: Arc<PaymentGatewayClient>,
}
