//! Карта зала: единственный источник правды о доступности мест.
//!
//! Удержание (`hold`) берёт весь набор мест целиком или не берёт ничего:
//! строки мест блокируются `SELECT ... FOR UPDATE`, поэтому два
//! конкурентных покупателя не могут получить одно и то же свободное место.
//! Удержание - это аренда с TTL; истёкшая аренда видна как свободное место
//! и перехватывается следующим покупателем без участия фоновой очистки.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::ApiError;
use crate::models::seat::{Seat, SeatState, SeatType, SeatView};

/// Успешно взятая аренда набора мест.
#[derive(Debug, Clone)]
pub struct Hold {
    pub token: Uuid,
    pub showtime_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub seats: Vec<HeldSeat>,
}

#[derive(Debug, Clone)]
pub struct HeldSeat {
    pub id: Uuid,
    pub label: String,
    pub seat_type: SeatType,
    pub price: i64,
}

/// Строка места под блокировкой, достаточная для решения о конфликте.
#[derive(Debug, Clone)]
struct LockedSeat {
    id: Uuid,
    label: String,
    seat_type: SeatType,
    price: i64,
    state: SeatState,
    hold_expires_at: Option<DateTime<Utc>>,
}

/// Места из запрошенного набора, которые нельзя удержать сейчас.
/// Held с истёкшей арендой конфликтом не считается - аренда перехватывается.
fn conflicting_labels(seats: &[LockedSeat], now: DateTime<Utc>) -> Vec<String> {
    seats
        .iter()
        .filter(|s| match s.state {
            SeatState::Open => false,
            SeatState::Booked => true,
            SeatState::Held => match s.hold_expires_at {
                Some(expires) => expires > now,
                // held без срока не должно существовать; считаем занятым
                None => true,
            },
        })
        .map(|s| s.label.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseDecision {
    /// Аренда действительна, места переводятся в booked.
    Confirm,
    /// Аренда уже потреблена этой же бронью - повторный confirm, no-op.
    AlreadyConfirmed,
    /// Аренда истекла, отозвана или потреблена другой бронью.
    Expired,
}

fn decide_confirm(
    consumed_by: Option<Uuid>,
    released: bool,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    booking_id: Uuid,
) -> LeaseDecision {
    match consumed_by {
        Some(existing) if existing == booking_id => LeaseDecision::AlreadyConfirmed,
        Some(_) => LeaseDecision::Expired,
        None if released => LeaseDecision::Expired,
        None if expires_at <= now => LeaseDecision::Expired,
        None => LeaseDecision::Confirm,
    }
}

#[derive(Clone)]
pub struct SeatMap {
    db: Database,
}

impl SeatMap {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn showtime_exists(&self, showtime_id: Uuid) -> Result<bool, ApiError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM showtimes WHERE id = $1)")
                .bind(showtime_id)
                .fetch_one(&self.db.pool)
                .await?;
        Ok(exists)
    }

    /// Все места сеанса в порядке (ряд, номер) с актуальным состоянием.
    pub async fn availability(&self, showtime_id: Uuid) -> Result<Vec<SeatView>, ApiError> {
        if !self.showtime_exists(showtime_id).await? {
            return Err(ApiError::NotFound("Сеанс не найден".to_string()));
        }

        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, showtime_id, row_label, number, seat_type, price, state,
                    hold_token, hold_expires_at, booking_id
             FROM seats
             WHERE showtime_id = $1
             ORDER BY row_label, number",
        )
        .bind(showtime_id)
        .fetch_all(&self.db.pool)
        .await?;

        let now = Utc::now();
        seats.iter().map(|s| SeatView::from_seat(s, now)).collect()
    }

    /// Атомарно удержать набор мест: либо все названные места свободны и
    /// переходят в held, либо ничего не меняется и возвращается список
    /// конфликтующих мест.
    pub async fn hold(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        user_id: i32,
        ttl: Duration,
    ) -> Result<Hold, ApiError> {
        let mut ids: Vec<Uuid> = seat_ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Err(ApiError::InvalidInput(
                "не выбрано ни одного места".to_string(),
            ));
        }

        let mut tx = self.db.pool.begin().await?;

        let rows = sqlx::query_as::<_, (Uuid, String, i32, String, i64, String, Option<DateTime<Utc>>)>(
            "SELECT id, row_label, number, seat_type, price, state, hold_expires_at
             FROM seats
             WHERE showtime_id = $1 AND id = ANY($2)
             ORDER BY row_label, number
             FOR UPDATE",
        )
        .bind(showtime_id)
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() != ids.len() {
            return Err(ApiError::InvalidInput(
                "часть выбранных мест не относится к этому сеансу".to_string(),
            ));
        }

        let locked: Vec<LockedSeat> = rows
            .into_iter()
            .map(|(id, row_label, number, seat_type, price, state, hold_expires_at)| {
                Ok(LockedSeat {
                    id,
                    label: format!("{}{}", row_label, number),
                    seat_type: SeatType::parse(&seat_type)?,
                    price,
                    state: SeatState::parse(&state)?,
                    hold_expires_at,
                })
            })
            .collect::<Result<_, ApiError>>()?;

        let now = Utc::now();
        let conflicts = conflicting_labels(&locked, now);
        if !conflicts.is_empty() {
            // Транзакция откатывается вместе с блокировками
            return Err(ApiError::SeatUnavailable { seats: conflicts });
        }

        let token = Uuid::new_v4();
        let expires_at = now + ttl;

        // Сначала аренда, потом места: seats.hold_token ссылается на holds.token
        sqlx::query(
            "INSERT INTO holds (token, showtime_id, user_id, seat_ids, expires_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(token)
        .bind(showtime_id)
        .bind(user_id)
        .bind(&ids)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats
             SET state = 'held', hold_token = $1, hold_expires_at = $2, booking_id = NULL
             WHERE id = ANY($3)",
        )
        .bind(token)
        .bind(expires_at)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Hold {
            token,
            showtime_id,
            expires_at,
            seats: locked
                .into_iter()
                .map(|s| HeldSeat {
                    id: s.id,
                    label: s.label,
                    seat_type: s.seat_type,
                    price: s.price,
                })
                .collect(),
        })
    }

    /// Перевести арендованные места в booked в рамках транзакции фиксации
    /// брони. Повторный confirm той же брони - no-op успех.
    pub async fn confirm(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: Uuid,
        booking_id: Uuid,
    ) -> Result<(Uuid, Vec<Uuid>), ApiError> {
        let row = sqlx::query_as::<_, (Uuid, Vec<Uuid>, DateTime<Utc>, Option<Uuid>, bool)>(
            "SELECT showtime_id, seat_ids, expires_at, consumed_by, released
             FROM holds
             WHERE token = $1
             FOR UPDATE",
        )
        .bind(token)
        .fetch_optional(&mut **tx)
        .await?;

        let (showtime_id, seat_ids, expires_at, consumed_by, released) =
            row.ok_or(ApiError::HoldExpired)?;

        match decide_confirm(consumed_by, released, expires_at, Utc::now(), booking_id) {
            LeaseDecision::AlreadyConfirmed => Ok((showtime_id, seat_ids)),
            LeaseDecision::Expired => Err(ApiError::HoldExpired),
            LeaseDecision::Confirm => {
                let updated = sqlx::query(
                    "UPDATE seats
                     SET state = 'booked', booking_id = $1,
                         hold_token = NULL, hold_expires_at = NULL
                     WHERE hold_token = $2 AND state = 'held'",
                )
                .bind(booking_id)
                .bind(token)
                .execute(&mut **tx)
                .await?;

                if updated.rows_affected() as usize != seat_ids.len() {
                    return Err(ApiError::Internal(format!(
                        "hold {} covers {} seats but {} were confirmed",
                        token,
                        seat_ids.len(),
                        updated.rows_affected()
                    )));
                }

                sqlx::query("UPDATE holds SET consumed_by = $1 WHERE token = $2")
                    .bind(booking_id)
                    .bind(token)
                    .execute(&mut **tx)
                    .await?;

                Ok((showtime_id, seat_ids))
            }
        }
    }

    /// Вернуть арендованные места в open. Идемпотентно: неизвестный,
    /// уже отозванный или потреблённый токен - no-op.
    pub async fn release(&self, token: Uuid) -> Result<Option<Uuid>, ApiError> {
        let mut tx = self.db.pool.begin().await?;

        let row = sqlx::query_as::<_, (Uuid, Option<Uuid>, bool)>(
            "SELECT showtime_id, consumed_by, released FROM holds WHERE token = $1 FOR UPDATE",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let showtime_id = match row {
            Some((showtime_id, None, false)) => showtime_id,
            _ => return Ok(None),
        };

        sqlx::query(
            "UPDATE seats
             SET state = 'open', hold_token = NULL, hold_expires_at = NULL, booking_id = NULL
             WHERE hold_token = $1 AND state = 'held'",
        )
        .bind(token)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE holds SET released = TRUE WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(showtime_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(label: &str, state: SeatState, expires_in: Option<i64>) -> LockedSeat {
        LockedSeat {
            id: Uuid::new_v4(),
            label: label.to_string(),
            seat_type: SeatType::Normal,
            price: 200,
            state,
            hold_expires_at: expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        }
    }

    #[test]
    fn overlapping_hold_reports_exactly_the_taken_seats() {
        // X удерживает A2; Y просит {A2, A3} - конфликт ровно по A2
        let now = Utc::now();
        let requested = vec![
            locked("A2", SeatState::Held, Some(120)),
            locked("A3", SeatState::Open, None),
        ];
        assert_eq!(conflicting_labels(&requested, now), vec!["A2".to_string()]);
    }

    #[test]
    fn booked_seats_always_conflict() {
        let now = Utc::now();
        let requested = vec![locked("B1", SeatState::Booked, None)];
        assert_eq!(conflicting_labels(&requested, now), vec!["B1".to_string()]);
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let now = Utc::now();
        let requested = vec![
            locked("C4", SeatState::Held, Some(-5)),
            locked("C5", SeatState::Open, None),
        ];
        assert!(conflicting_labels(&requested, now).is_empty());
    }

    #[test]
    fn held_without_expiry_counts_as_taken() {
        let now = Utc::now();
        let requested = vec![locked("D1", SeatState::Held, None)];
        assert_eq!(conflicting_labels(&requested, now), vec!["D1".to_string()]);
    }

    #[test]
    fn confirm_of_live_lease_proceeds() {
        let now = Utc::now();
        let booking = Uuid::new_v4();
        assert_eq!(
            decide_confirm(None, false, now + Duration::seconds(60), now, booking),
            LeaseDecision::Confirm
        );
    }

    #[test]
    fn repeated_confirm_with_same_booking_is_noop() {
        let now = Utc::now();
        let booking = Uuid::new_v4();
        assert_eq!(
            decide_confirm(Some(booking), false, now + Duration::seconds(60), now, booking),
            LeaseDecision::AlreadyConfirmed
        );
    }

    #[test]
    fn confirm_consumed_by_other_booking_fails() {
        let now = Utc::now();
        assert_eq!(
            decide_confirm(
                Some(Uuid::new_v4()),
                false,
                now + Duration::seconds(60),
                now,
                Uuid::new_v4()
            ),
            LeaseDecision::Expired
        );
    }

    #[test]
    fn confirm_after_expiry_or_release_fails() {
        let now = Utc::now();
        let booking = Uuid::new_v4();
        assert_eq!(
            decide_confirm(None, false, now - Duration::seconds(1), now, booking),
            LeaseDecision::Expired
        );
        assert_eq!(
            decide_confirm(None, true, now + Duration::seconds(60), now, booking),
            LeaseDecision::Expired
        );
    }
}
