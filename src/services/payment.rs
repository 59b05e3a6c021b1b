//! Клиент платёжного шлюза.
//!
//! Шлюз - внешний, медленный и ненадёжный собеседник: один синхронный
//! вызов `charge` со своим таймаутом, подписанный SHA-256-токеном.
//! Все сетевые вызовы идут через Circuit Breaker: после серии сбоев
//! запросы блокируются до истечения таймаута, затем пропускается один
//! пробный запрос (состояния Closed / Open / HalfOpen).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::error::ApiError;

/// Состояния "Автоматического выключателя".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим, запросы разрешены.
    Closed,
    /// Запросы заблокированы после серии сбоев.
    Open,
    /// После таймаута разрешён один пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .read()
                    .unwrap()
                    .map(|at| at.elapsed())
                    .unwrap_or(self.timeout);
                if elapsed >= self.timeout {
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("Circuit breaker recovered - transitioning to Closed state");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.write().unwrap() = Some(Instant::now());

        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => {
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(
                        "Circuit breaker OPENED - {} failures reached threshold {}",
                        failures, self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            CircuitState::Open => {}
        }
    }

    pub fn get_state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }
}

/// Способ оплаты, который выбрал покупатель.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
        }
    }
}

/// Чек успешного списания; его идентификатор - ключ идемпотентности
/// фиксации брони.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub receipt_id: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
struct ChargeRequest {
    #[serde(rename = "merchantId")]
    merchant_id: String,
    token: String,
    amount: i64,
    currency: String,
    #[serde(rename = "orderId")]
    order_id: String,
    description: String,
    method: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    success: bool,
    #[serde(rename = "receiptId")]
    receipt_id: Option<String>,
    message: Option<String>,
}

/// Клиент платёжного шлюза.
pub struct PaymentGatewayClient {
    merchant_id: String,
    password: String,
    base_url: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

const CURRENCY: &str = "INR";

impl PaymentGatewayClient {
    pub fn from_config(config: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Self {
        Self {
            merchant_id: config.merchant_id.clone(),
            password: config.merchant_password.clone(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            circuit_breaker: CircuitBreaker::new(
                breaker.failure_threshold,
                breaker.timeout_seconds,
            ),
        }
    }

    /// Токен запроса: sha256(amount + currency + orderId + password + merchantId).
    fn sign(&self, amount: i64, order_id: &str) -> String {
        let token_string = format!(
            "{}{}{}{}{}",
            amount, CURRENCY, order_id, self.password, self.merchant_id
        );
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Единственная операция шлюза: списать сумму, вернуть чек.
    ///
    /// Отказ шлюза - `PaymentDeclined`; таймаут, сетевая ошибка или
    /// открытый Circuit Breaker - `PaymentFailed`. Попытка с таймаутом
    /// считается неуспешной, места остаются удержанными до конца аренды.
    pub async fn charge(
        &self,
        amount: i64,
        order_id: &str,
        description: &str,
        email: Option<String>,
        method: PaymentMethod,
    ) -> Result<Receipt, ApiError> {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(ApiError::PaymentFailed(
                "шлюз временно недоступен, попробуйте позже".to_string(),
            ));
        }

        let request = ChargeRequest {
            merchant_id: self.merchant_id.clone(),
            token: self.sign(amount, order_id),
            amount,
            currency: CURRENCY.to_string(),
            order_id: order_id.to_string(),
            description: description.to_string(),
            method: method.as_str().to_string(),
            email,
        };

        info!("Charging payment gateway: order_id={}, amount={}", order_id, amount);

        let result = async {
            self.http_client
                .post(format!("{}/api/v1/charge", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<ChargeResponse>()
                .await
        }
        .await;

        let response = match result {
            Ok(response) => {
                self.circuit_breaker.record_success();
                response
            }
            Err(e) => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                let reason = if e.is_timeout() {
                    "превышено время ожидания ответа".to_string()
                } else {
                    "ошибка соединения со шлюзом".to_string()
                };
                return Err(ApiError::PaymentFailed(reason));
            }
        };

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "платёж не прошёл".to_string());
            return Err(ApiError::PaymentDeclined(message));
        }

        let receipt_id = response.receipt_id.ok_or_else(|| {
            ApiError::PaymentFailed("шлюз не вернул идентификатор чека".to_string())
        })?;

        Ok(Receipt { receipt_id, amount })
    }

    /// Текущее состояние выключателя для мониторинга.
    pub fn circuit_breaker_status(&self) -> (CircuitState, u32) {
        (
            self.circuit_breaker.get_state(),
            self.circuit_breaker.failure_count.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, 60);
        assert!(breaker.can_execute());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(3, 60);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_closes_on_success_and_reopens_on_failure() {
        // Нулевой таймаут: Open сразу переходит в HalfOpen при следующей проверке
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);

        assert!(breaker.can_execute());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);

        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[test]
    fn signature_is_stable_and_hex_encoded() {
        let client = PaymentGatewayClient {
            merchant_id: "cinebook".to_string(),
            password: "secret".to_string(),
            base_url: "http://localhost".to_string(),
            http_client: reqwest::Client::new(),
            circuit_breaker: CircuitBreaker::new(5, 60),
        };
        let a = client.sign(750, "res-1");
        let b = client.sign(750, "res-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, client.sign(750, "res-2"));
    }
}
