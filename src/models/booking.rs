use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String,
    pub user_id: i32,
    pub showtime_id: Uuid,
    pub total_amount: i64,
    pub payment_status: String,
    pub booking_status: String,
    #[serde(skip_serializing)]
    pub payment_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Ответ на успешную оплату и страница подтверждения.
#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    pub booking_id: Uuid,
    pub reference: String,
    pub showtime_id: Uuid,
    pub seats: Vec<String>,
    pub total_amount: i64,
}
