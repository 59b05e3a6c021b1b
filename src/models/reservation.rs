use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;

/// Состояние машины бронирования.
///
/// selecting_seats -> seats_held -> selecting_concessions -> awaiting_payment -> confirmed,
/// из любого нетерминального состояния возможен уход в abandoned
/// (отмена пользователем или истечение брони мест).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    SelectingSeats,
    SeatsHeld,
    SelectingConcessions,
    AwaitingPayment,
    Confirmed,
    Abandoned,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::SelectingSeats => "selecting_seats",
            ReservationState::SeatsHeld => "seats_held",
            ReservationState::SelectingConcessions => "selecting_concessions",
            ReservationState::AwaitingPayment => "awaiting_payment",
            ReservationState::Confirmed => "confirmed",
            ReservationState::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "selecting_seats" => Ok(ReservationState::SelectingSeats),
            "seats_held" => Ok(ReservationState::SeatsHeld),
            "selecting_concessions" => Ok(ReservationState::SelectingConcessions),
            "awaiting_payment" => Ok(ReservationState::AwaitingPayment),
            "confirmed" => Ok(ReservationState::Confirmed),
            "abandoned" => Ok(ReservationState::Abandoned),
            other => Err(ApiError::Internal(format!(
                "unexpected reservation state in database: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationState::Confirmed | ReservationState::Abandoned)
    }

    /// Выбор мест разрешён до первого удержания и при повторном выборе,
    /// пока платёж не начат.
    pub fn allows_choose_seats(&self) -> bool {
        matches!(self, ReservationState::SelectingSeats | ReservationState::SeatsHeld)
    }

    /// Закуски можно менять, пока не подтверждён платёж.
    pub fn allows_choose_concessions(&self) -> bool {
        matches!(
            self,
            ReservationState::SeatsHeld | ReservationState::SelectingConcessions
        )
    }

    /// Оплата: сразу после удержания мест (без закусок), после выбора
    /// закусок, либо повторная попытка после отказа.
    pub fn allows_submit_payment(&self) -> bool {
        matches!(
            self,
            ReservationState::SeatsHeld
                | ReservationState::SelectingConcessions
                | ReservationState::AwaitingPayment
        )
    }

    pub fn allows_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

/// Выбор закусок: идентификатор позиции -> количество.
/// Количество приходит знаковым, отрицательные значения отклоняет
/// прайс-резолвер.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcessionSelection(pub BTreeMap<String, i64>);

impl ConcessionSelection {
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&q| q == 0)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i32,
    pub showtime_id: Uuid,
    pub state: String,
    pub hold_token: Option<Uuid>,
    pub concessions: serde_json::Value,
    pub seat_total: i64,
    pub concession_total: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn state(&self) -> Result<ReservationState, ApiError> {
        ReservationState::parse(&self.state)
    }

    pub fn total_amount(&self) -> i64 {
        self.seat_total + self.concession_total
    }
}

#[cfg(test)]
mod tests {
    use super::ReservationState::*;
    use super::*;

    const ALL: [ReservationState; 6] = [
        SelectingSeats,
        SeatsHeld,
        SelectingConcessions,
        AwaitingPayment,
        Confirmed,
        Abandoned,
    ];

    #[test]
    fn state_round_trips_through_text() {
        for state in ALL {
            assert_eq!(ReservationState::parse(state.as_str()).unwrap(), state);
        }
        assert!(ReservationState::parse("paid").is_err());
    }

    #[test]
    fn choose_seats_only_before_payment_started() {
        for state in ALL {
            assert_eq!(
                state.allows_choose_seats(),
                matches!(state, SelectingSeats | SeatsHeld),
                "{:?}",
                state
            );
        }
    }

    #[test]
    fn concessions_require_held_seats() {
        assert!(!SelectingSeats.allows_choose_concessions());
        assert!(SeatsHeld.allows_choose_concessions());
        assert!(SelectingConcessions.allows_choose_concessions());
        assert!(!AwaitingPayment.allows_choose_concessions());
        assert!(!Confirmed.allows_choose_concessions());
        assert!(!Abandoned.allows_choose_concessions());
    }

    #[test]
    fn payment_retryable_from_awaiting_payment() {
        assert!(AwaitingPayment.allows_submit_payment());
        assert!(SeatsHeld.allows_submit_payment());
        assert!(SelectingConcessions.allows_submit_payment());
        assert!(!SelectingSeats.allows_submit_payment());
        assert!(!Confirmed.allows_submit_payment());
        assert!(!Abandoned.allows_submit_payment());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for state in [Confirmed, Abandoned] {
            assert!(state.is_terminal());
            assert!(!state.allows_choose_seats());
            assert!(!state.allows_choose_concessions());
            assert!(!state.allows_submit_payment());
            assert!(!state.allows_cancel());
        }
    }

    #[test]
    fn cancel_from_any_non_terminal_state() {
        for state in [SelectingSeats, SeatsHeld, SelectingConcessions, AwaitingPayment] {
            assert!(state.allows_cancel(), "{:?}", state);
        }
    }

    #[test]
    fn all_zero_selection_is_empty() {
        let mut map = BTreeMap::new();
        map.insert("popcorn".to_string(), 0);
        assert!(ConcessionSelection(map).is_empty());
        assert!(ConcessionSelection::default().is_empty());
    }
}
