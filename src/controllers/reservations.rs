use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::ConcessionSelection;
use crate::services::payment::PaymentMethod;
use crate::services::reservation::ReservationService;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(start_reservation))
        .route("/reservations/{id}/seats", patch(choose_seats))
        .route("/reservations/{id}/concessions", patch(choose_concessions))
        .route("/reservations/{id}/payment", post(submit_payment))
        .route("/reservations/{id}/cancel", patch(cancel_reservation))
}

/* ---------- Request структуры ---------- */

#[derive(Debug, Deserialize)]
struct StartReservationRequest {
    showtime_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
struct ChooseSeatsRequest {
    #[validate(length(min = 1, max = 10, message = "можно выбрать от 1 до 10 мест"))]
    seat_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ChooseConcessionsRequest {
    items: ConcessionSelection,
}

#[derive(Debug, Deserialize)]
struct SubmitPaymentRequest {
    method: PaymentMethod,
}

/* ---------- Handlers ---------- */

// POST /api/reservations
async fn start_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<StartReservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ReservationService::new(state);
    let reservation = service.start(user.user_id, req.showtime_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "reservation": reservation })),
    ))
}

// PATCH /api/reservations/{id}/seats
//
// Конфликт мест возвращается как 409 со списком занятых мест, клиент
// перерисовывает карту зала и пробует снова.
async fn choose_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<ChooseSeatsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let service = ReservationService::new(state);
    let reservation = service
        .choose_seats(user.user_id, reservation_id, req.seat_ids)
        .await?;

    Ok(Json(json!({ "success": true, "reservation": reservation })))
}

// PATCH /api/reservations/{id}/concessions
async fn choose_concessions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<ChooseConcessionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ReservationService::new(state);
    let reservation = service
        .choose_concessions(user.user_id, reservation_id, req.items)
        .await?;

    Ok(Json(json!({ "success": true, "reservation": reservation })))
}

// POST /api/reservations/{id}/payment
async fn submit_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<SubmitPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ReservationService::new(state);
    let confirmation = service
        .submit_payment(
            user.user_id,
            reservation_id,
            req.method,
            Some(user.email.clone()),
        )
        .await?;

    Ok(Json(json!({ "success": true, "booking": confirmation })))
}

// PATCH /api/reservations/{id}/cancel
async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ReservationService::new(state);
    let reservation = service.cancel(user.user_id, reservation_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Бронирование отменено, места освобождены",
        "reservation": reservation,
    })))
}
