use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Классы ошибок всего сервиса. Каждая ошибка отдаёт клиенту конкретную
/// причину, а не общий "что-то пошло не так".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    /// Конфликт при удержании мест: перечисляются именно те места,
    /// которые заняты другим покупателем.
    #[error("Места уже заняты: {}", seats.join(", "))]
    SeatUnavailable { seats: Vec<String> },

    #[error("Время брони мест истекло, выберите места заново")]
    HoldExpired,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Платёж отклонён: {0}")]
    PaymentDeclined(String),

    #[error("Платёжный шлюз недоступен: {0}")]
    PaymentFailed(String),

    /// Фиксация брони не удалась уже после успешного списания.
    /// Повторяется идемпотентно с тем же чеком, деньги не списываются дважды.
    #[error("Не удалось зафиксировать бронирование, платёж сохранён - повторите запрос")]
    CommitFailure,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SeatUnavailable { .. } => StatusCode::CONFLICT,
            ApiError::HoldExpired => StatusCode::GONE,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::PaymentFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::CommitFailure | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Внутренности БД наружу не отдаём, только в лог
        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                "Ошибка базы данных".to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                "Внутренняя ошибка сервиса".to_string()
            }
            other => other.to_string(),
        };

        let body = match &self {
            ApiError::SeatUnavailable { seats } => json!({
                "success": false,
                "message": message,
                "seats": seats,
            }),
            _ => json!({
                "success": false,
                "message": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(
            ApiError::NotFound("Фильм не найден".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::SeatUnavailable { seats: vec!["A2".into()] }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::HoldExpired.status(), StatusCode::GONE);
        assert_eq!(
            ApiError::InvalidInput("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PaymentDeclined("insufficient funds".into()).status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::PaymentFailed("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::CommitFailure.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn conflict_message_names_the_seats() {
        let err = ApiError::SeatUnavailable {
            seats: vec!["A2".into(), "A3".into()],
        };
        assert_eq!(err.to_string(), "Места уже заняты: A2, A3");
    }
}
