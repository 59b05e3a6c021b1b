use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Showtime {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub screen_id: Uuid,
    pub show_date: NaiveDate,
    pub show_time: NaiveTime,
    pub base_price: i64,
    pub format: String,
}

// Строка для выдачи расписания вместе с кинотеатром
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ShowtimeWithCinema {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub screen_id: Uuid,
    pub show_date: NaiveDate,
    pub show_time: NaiveTime,
    pub base_price: i64,
    pub format: String,
    pub cinema_id: Uuid,
    pub cinema_name: String,
    pub cinema_location: String,
}

/// Один ряд из плана зала (`screens.layout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutRow {
    pub row_label: String,
    pub seat_type: String,
    pub seats: i32,
}
