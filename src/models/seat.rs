use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;

/// Ценовая категория места.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatType {
    Normal,
    Premium,
    Recliner,
}

impl SeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Normal => "normal",
            SeatType::Premium => "premium",
            SeatType::Recliner => "recliner",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "normal" => Ok(SeatType::Normal),
            "premium" => Ok(SeatType::Premium),
            "recliner" => Ok(SeatType::Recliner),
            other => Err(ApiError::InvalidInput(format!(
                "неизвестная категория места: {}",
                other
            ))),
        }
    }
}

/// Состояние места. Переходы: open -> held -> booked, held -> open (release).
/// booked никогда не возвращается в open - отмены подтверждённых броней нет.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatState {
    Open,
    Held,
    Booked,
}

impl SeatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatState::Open => "open",
            SeatState::Held => "held",
            SeatState::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "open" => Ok(SeatState::Open),
            "held" => Ok(SeatState::Held),
            "booked" => Ok(SeatState::Booked),
            other => Err(ApiError::Internal(format!(
                "unexpected seat state in database: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Seat {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub row_label: String,
    pub number: i32,
    pub seat_type: String,
    pub price: i64,
    pub state: String,
    #[serde(skip_serializing)]
    pub hold_token: Option<Uuid>,
    #[serde(skip_serializing)]
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub booking_id: Option<Uuid>,
}

impl Seat {
    /// Человекочитаемая метка: ряд + номер, например "A7".
    pub fn label(&self) -> String {
        format!("{}{}", self.row_label, self.number)
    }

    /// Фактическое состояние с учётом истёкшей брони: held с истёкшим
    /// сроком снаружи выглядит как open.
    pub fn effective_state(&self, now: DateTime<Utc>) -> Result<SeatState, ApiError> {
        let state = SeatState::parse(&self.state)?;
        if state == SeatState::Held {
            match self.hold_expires_at {
                Some(expires) if expires > now => Ok(SeatState::Held),
                _ => Ok(SeatState::Open),
            }
        } else {
            Ok(state)
        }
    }
}

/// То, что видит клиент в карте зала.
#[derive(Debug, Clone, Serialize)]
pub struct SeatView {
    pub id: Uuid,
    pub label: String,
    pub row_label: String,
    pub number: i32,
    pub seat_type: SeatType,
    pub price: i64,
    pub state: SeatState,
}

impl SeatView {
    pub fn from_seat(seat: &Seat, now: DateTime<Utc>) -> Result<Self, ApiError> {
        Ok(SeatView {
            id: seat.id,
            label: seat.label(),
            row_label: seat.row_label.clone(),
            number: seat.number,
            seat_type: SeatType::parse(&seat.seat_type)?,
            price: seat.price,
            state: seat.effective_state(now)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seat(state: &str, expires_in: Option<i64>) -> Seat {
        let now = Utc::now();
        Seat {
            id: Uuid::new_v4(),
            showtime_id: Uuid::new_v4(),
            row_label: "A".to_string(),
            number: 7,
            seat_type: "normal".to_string(),
            price: 200,
            state: state.to_string(),
            hold_token: None,
            hold_expires_at: expires_in.map(|s| now + Duration::seconds(s)),
            booking_id: None,
        }
    }

    #[test]
    fn label_joins_row_and_number() {
        assert_eq!(seat("open", None).label(), "A7");
    }

    #[test]
    fn expired_hold_reads_as_open() {
        let now = Utc::now();
        assert_eq!(
            seat("held", Some(-10)).effective_state(now).unwrap(),
            SeatState::Open
        );
        assert_eq!(
            seat("held", Some(60)).effective_state(now).unwrap(),
            SeatState::Held
        );
        assert_eq!(
            seat("booked", None).effective_state(now).unwrap(),
            SeatState::Booked
        );
    }
}
