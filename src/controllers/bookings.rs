use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(get_user_bookings))
        .route("/bookings/{id}", get(get_booking))
}

#[derive(Debug, Serialize)]
struct BookingListItem {
    id: Uuid,
    reference: String,
    showtime_id: Uuid,
    movie_title: String,
    total_amount: i64,
    booking_status: String,
    created_at: DateTime<Utc>,
    seats: Vec<String>,
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query_as::<_, (Uuid, String, Uuid, String, i64, String, DateTime<Utc>, Option<String>, Option<i32>)>(
        r#"
        SELECT b.id, b.reference, b.showtime_id, m.title, b.total_amount,
               b.booking_status, b.created_at, s.row_label, s.number
        FROM bookings b
        JOIN showtimes st ON st.id = b.showtime_id
        JOIN movies m ON m.id = st.movie_id
        LEFT JOIN booking_seats bs ON bs.booking_id = b.id
        LEFT JOIN seats s ON s.id = bs.seat_id
        WHERE b.user_id = $1
        ORDER BY b.created_at DESC, s.row_label, s.number
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await?;

    // Группируем строки по брони; порядок отдачи сохраняется
    let mut bookings: Vec<BookingListItem> = Vec::new();
    for (id, reference, showtime_id, movie_title, total_amount, booking_status, created_at, row_label, number) in
        rows
    {
        if bookings.last().map(|b| b.id) != Some(id) {
            bookings.push(BookingListItem {
                id,
                reference,
                showtime_id,
                movie_title,
                total_amount,
                booking_status,
                created_at,
                seats: Vec::new(),
            });
        }
        if let (Some(row), Some(number), Some(current)) = (row_label, number, bookings.last_mut()) {
            current.seats.push(format!("{}{}", row, number));
        }
    }

    Ok(Json(json!({ "success": true, "bookings": bookings })))
}

// GET /api/bookings/{id} - страница подтверждения
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = sqlx::query_as::<_, (Uuid, String, Uuid, i64, String, String, DateTime<Utc>, String, NaiveDate, NaiveTime, String)>(
        r#"
        SELECT b.id, b.reference, b.showtime_id, b.total_amount, b.payment_status,
               b.booking_status, b.created_at, m.title, st.show_date, st.show_time, c.name
        FROM bookings b
        JOIN showtimes st ON st.id = b.showtime_id
        JOIN movies m ON m.id = st.movie_id
        JOIN screens sc ON sc.id = st.screen_id
        JOIN cinemas c ON c.id = sc.cinema_id
        WHERE b.id = $1 AND b.user_id = $2
        "#,
    )
    .bind(booking_id)
    .bind(user.user_id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Бронирование не найдено".to_string()))?;

    let (id, reference, showtime_id, total_amount, payment_status, booking_status, created_at, movie_title, show_date, show_time, cinema_name) =
        booking;

    let seats: Vec<String> = sqlx::query_as::<_, (String, i32)>(
        "SELECT s.row_label, s.number
         FROM booking_seats bs
         JOIN seats s ON s.id = bs.seat_id
         WHERE bs.booking_id = $1
         ORDER BY s.row_label, s.number",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .map(|(row, number)| format!("{}{}", row, number))
    .collect();

    Ok(Json(json!({
        "success": true,
        "booking": {
            "id": id,
            "reference": reference,
            "showtime_id": showtime_id,
            "movie_title": movie_title,
            "cinema": cinema_name,
            "show_date": show_date,
            "show_time": show_time,
            "seats": seats,
            "total_amount": total_amount,
            "payment_status": payment_status,
            "booking_status": booking_status,
            "created_at": created_at,
        },
    })))
}
