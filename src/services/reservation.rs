//! Оркестратор бронирования.
//!
//! Ведёт персистентную машину состояний (selecting_seats -> seats_held ->
//! selecting_concessions -> awaiting_payment -> confirmed / abandoned) и
//! выполняет атомарную фиксацию: бронь, перевод мест в booked и связки
//! место↔бронь создаются одной транзакцией. Фиксация идемпотентна по
//! чеку платежа - сколько бы раз её ни повторили, бронь будет одна и
//! деньги спишутся один раз.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::booking::BookingConfirmation;
use crate::models::{Booking, ConcessionSelection, Reservation};
use crate::pricing;
use crate::services::payment::{PaymentMethod, Receipt};
use crate::services::seat_map::SeatMap;
use crate::AppState;

/// Человекочитаемый код брони: BK- и 8 шестнадцатеричных знаков из
/// криптослучайного UUID. Коллизия перехватывается уникальным индексом
/// и повторной генерацией.
fn booking_reference() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("BK-{}", id[..8].to_uppercase())
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

/// Живая аренда мест текущего бронирования.
struct LiveHold {
    token: Uuid,
    seat_count: i64,
}

pub struct ReservationService {
    state: Arc<AppState>,
    seat_map: SeatMap,
}

impl ReservationService {
    pub fn new(state: Arc<AppState>) -> Self {
        let seat_map = SeatMap::new(state.db.clone());
        Self { state, seat_map }
    }

    /// Начать бронирование: новая запись в selecting_seats.
    pub async fn start(&self, user_id: i32, showtime_id: Uuid) -> Result<Reservation, ApiError> {
        if !self.seat_map.showtime_exists(showtime_id).await? {
            return Err(ApiError::NotFound("Сеанс не найден".to_string()));
        }

        let reservation = sqlx::query_as::<_, Reservation>(
            "INSERT INTO reservations (user_id, showtime_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(user_id)
        .bind(showtime_id)
        .fetch_one(&self.state.db.pool)
        .await?;

        Ok(reservation)
    }

    async fn load_owned(&self, reservation_id: Uuid, user_id: i32) -> Result<Reservation, ApiError> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE id = $1 AND user_id = $2",
        )
        .bind(reservation_id)
        .bind(user_id)
        .fetch_optional(&self.state.db.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Бронирование не найдено".to_string()))
    }

    /// Выбрать места: атомарное удержание всего набора. При конфликте
    /// состояние остаётся selecting_seats, а клиент получает список
    /// занятых мест и перерисовывает карту зала.
    pub async fn choose_seats(
        &self,
        user_id: i32,
        reservation_id: Uuid,
        seat_ids: Vec<Uuid>,
    ) -> Result<Reservation, ApiError> {
        let reservation = self.load_owned(reservation_id, user_id).await?;
        let state = reservation.state()?;
        if !state.allows_choose_seats() {
            return Err(ApiError::InvalidInput(format!(
                "на шаге {} выбирать места нельзя",
                state.as_str()
            )));
        }

        // Повторный выбор: старая аренда отпускается до новой попытки,
        // чтобы пользователь не блокировал сам себя
        if let Some(old_token) = reservation.hold_token {
            if let Some(showtime_id) = self.seat_map.release(old_token).await? {
                self.state.cache.invalidate_seats(showtime_id).await;
            }
            sqlx::query(
                "UPDATE reservations
                 SET state = 'selecting_seats', hold_token = NULL, seat_total = 0,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(reservation.id)
            .execute(&self.state.db.pool)
            .await?;
        }

        let ttl = Duration::seconds(self.state.config.booking.hold_ttl_seconds);
        let hold = self
            .seat_map
            .hold(reservation.showtime_id, &seat_ids, user_id, ttl)
            .await?;

        let seat_total: i64 = hold.seats.iter().map(|s| s.price).sum();

        let updated = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations
             SET state = 'seats_held', hold_token = $1, seat_total = $2, updated_at = NOW()
             WHERE id = $3
             RETURNING *",
        )
        .bind(hold.token)
        .bind(seat_total)
        .bind(reservation.id)
        .fetch_one(&self.state.db.pool)
        .await?;

        self.state.cache.invalidate_seats(hold.showtime_id).await;
        info!(
            "Reservation {} holds {} seats until {}",
            reservation.id,
            hold.seats.len(),
            hold.expires_at
        );

        Ok(updated)
    }

    /// Выбрать закуски: чистое накопление данных, без внешних вызовов.
    pub async fn choose_concessions(
        &self,
        user_id: i32,
        reservation_id: Uuid,
        selection: ConcessionSelection,
    ) -> Result<Reservation, ApiError> {
        let reservation = self.load_owned(reservation_id, user_id).await?;
        let state = reservation.state()?;
        if !state.allows_choose_concessions() {
            return Err(ApiError::InvalidInput(format!(
                "на шаге {} выбирать закуски нельзя",
                state.as_str()
            )));
        }

        self.ensure_live_hold(&reservation).await?;

        let concession_total = pricing::concessions_total(&selection)?;
        let concessions_json = serde_json::to_value(&selection)
            .map_err(|e| ApiError::Internal(format!("failed to encode concessions: {}", e)))?;

        let updated = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations
             SET state = 'selecting_concessions', concessions = $1, concession_total = $2,
                 updated_at = NOW()
             WHERE id = $3
             RETURNING *",
        )
        .bind(concessions_json)
        .bind(concession_total)
        .bind(reservation.id)
        .fetch_one(&self.state.db.pool)
        .await?;

        Ok(updated)
    }

    /// Оплатить и зафиксировать бронь.
    ///
    /// Отказ шлюза оставляет бронирование в awaiting_payment - пока жива
    /// аренда, попытку можно повторить. Уже списанный, но не применённый
    /// чек переиспользуется вместо повторного списания.
    pub async fn submit_payment(
        &self,
        user_id: i32,
        reservation_id: Uuid,
        method: PaymentMethod,
        email: Option<String>,
    ) -> Result<BookingConfirmation, ApiError> {
        let reservation = self.load_owned(reservation_id, user_id).await?;
        let state = reservation.state()?;
        if !state.allows_submit_payment() {
            return Err(ApiError::InvalidInput(format!(
                "на шаге {} оплата невозможна",
                state.as_str()
            )));
        }

        let hold = self.ensure_live_hold(&reservation).await?;
        let hold_token = hold.token;

        let total = reservation.total_amount();
        if total <= 0 {
            return Err(ApiError::InvalidInput(
                "стоимость бронирования должна быть больше нуля".to_string(),
            ));
        }

        // Фиксируем шаг оплаты до обращения к шлюзу
        let reservation = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations SET state = 'awaiting_payment', updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(reservation.id)
        .fetch_one(&self.state.db.pool)
        .await?;

        let receipt = match self.find_captured_receipt(reservation.id).await? {
            Some(receipt) => {
                info!(
                    "Reusing captured receipt {} for reservation {}",
                    receipt.receipt_id, reservation.id
                );
                receipt
            }
            None => {
                let description = self.charge_description(&reservation, hold.seat_count).await?;
                let order_id = reservation.id.to_string();
                let receipt = self
                    .state
                    .payments
                    .charge(total, &order_id, &description, email, method)
                    .await?;

                // Чек записывается до фиксации: упади сервис между списанием
                // и коммитом, повторная оплата найдёт его и не спишет дважды
                sqlx::query(
                    "INSERT INTO payment_transactions (reservation_id, receipt_id, amount)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (receipt_id) DO NOTHING",
                )
                .bind(reservation.id)
                .bind(&receipt.receipt_id)
                .bind(receipt.amount)
                .execute(&self.state.db.pool)
                .await?;

                receipt
            }
        };

        // Фиксация с повторами: платёж уже прошёл, терять его нельзя
        let attempts = self.state.config.booking.commit_retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.commit_booking(&reservation, hold_token, &receipt).await {
                Ok(confirmation) => {
                    self.state.cache.invalidate_seats(reservation.showtime_id).await;
                    info!(
                        "Booking {} ({}) committed for reservation {}",
                        confirmation.booking_id, confirmation.reference, reservation.id
                    );
                    return Ok(confirmation);
                }
                Err(ApiError::HoldExpired) => return Err(ApiError::HoldExpired),
                Err(e) => {
                    warn!(
                        "Commit attempt {}/{} failed for reservation {}: {}",
                        attempt, attempts, reservation.id, e
                    );
                    last_error = Some(e);
                }
            }
        }

        warn!(
            "Booking commit exhausted retries for reservation {}: {:?}",
            reservation.id, last_error
        );
        Err(ApiError::CommitFailure)
    }

    /// Отменить бронирование: освободить аренду и уйти в abandoned.
    /// Освобождение выполняется на любом пути выхода, даже если сам
    /// release не удался.
    pub async fn cancel(&self, user_id: i32, reservation_id: Uuid) -> Result<Reservation, ApiError> {
        let reservation = self.load_owned(reservation_id, user_id).await?;
        let state = reservation.state()?;
        if !state.allows_cancel() {
            return Err(ApiError::InvalidInput(
                "бронирование уже завершено".to_string(),
            ));
        }

        if let Some(token) = reservation.hold_token {
            match self.seat_map.release(token).await {
                Ok(Some(showtime_id)) => self.state.cache.invalidate_seats(showtime_id).await,
                Ok(None) => {}
                Err(e) => warn!(
                    "Failed to release hold {} while cancelling reservation {}: {}",
                    token, reservation.id, e
                ),
            }
        }

        let updated = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations SET state = 'abandoned', updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(reservation.id)
        .fetch_one(&self.state.db.pool)
        .await?;

        Ok(updated)
    }

    /// Проверить, что аренда мест ещё жива. Истёкшая аренда переводит
    /// бронирование в abandoned и возвращает HoldExpired.
    async fn ensure_live_hold(&self, reservation: &Reservation) -> Result<LiveHold, ApiError> {
        let token = reservation.hold_token.ok_or_else(|| {
            ApiError::Internal(format!(
                "reservation {} in state {} has no hold token",
                reservation.id, reservation.state
            ))
        })?;

        let row = sqlx::query_as::<_, (chrono::DateTime<Utc>, Option<Uuid>, bool, i64)>(
            "SELECT expires_at, consumed_by, released, cardinality(seat_ids)::BIGINT
             FROM holds WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.state.db.pool)
        .await?;

        let live = match row {
            Some((expires_at, None, false, seat_count)) if expires_at > Utc::now() => {
                Some(LiveHold { token, seat_count })
            }
            _ => None,
        };

        match live {
            Some(hold) => Ok(hold),
            None => {
                warn!(
                    "Hold {} for reservation {} lapsed, abandoning",
                    token, reservation.id
                );
                sqlx::query(
                    "UPDATE reservations SET state = 'abandoned', updated_at = NOW() WHERE id = $1",
                )
                .bind(reservation.id)
                .execute(&self.state.db.pool)
                .await?;
                Err(ApiError::HoldExpired)
            }
        }
    }

    async fn find_captured_receipt(&self, reservation_id: Uuid) -> Result<Option<Receipt>, ApiError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT receipt_id, amount FROM payment_transactions
             WHERE reservation_id = $1 AND status = 'captured'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(reservation_id)
        .fetch_optional(&self.state.db.pool)
        .await?;

        Ok(row.map(|(receipt_id, amount)| Receipt { receipt_id, amount }))
    }

    async fn charge_description(
        &self,
        reservation: &Reservation,
        seat_count: i64,
    ) -> Result<String, ApiError> {
        let title = sqlx::query_scalar::<_, String>(
            "SELECT m.title FROM showtimes st JOIN movies m ON m.id = st.movie_id
             WHERE st.id = $1",
        )
        .bind(reservation.showtime_id)
        .fetch_one(&self.state.db.pool)
        .await?;

        Ok(format!("{} - {} билет(ов)", title, seat_count))
    }

    /// Атомарная фиксация брони: одна транзакция на бронь, перевод мест
    /// и связки. Идемпотентна по чеку: существующая бронь с этим
    /// payment_ref возвращается как есть.
    async fn commit_booking(
        &self,
        reservation: &Reservation,
        token: Uuid,
        receipt: &Receipt,
    ) -> Result<BookingConfirmation, ApiError> {
        let mut tx = self.state.db.pool.begin().await?;

        // Чек уже применён? Тогда бронь существует - возвращаем её
        if let Some(existing) = self.existing_confirmation(&mut tx, receipt).await? {
            tx.commit().await?;
            return Ok(existing);
        }

        // ON CONFLICT вместо отлова ошибки: упавший INSERT прервал бы
        // всю транзакцию, а так коллизия кода просто пробует другой
        let booking_id = Uuid::new_v4();
        let mut reference = booking_reference();
        let mut reference_attempts = 0;
        loop {
            let inserted = sqlx::query(
                "INSERT INTO bookings
                     (id, reference, user_id, showtime_id, total_amount, payment_ref)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (reference) DO NOTHING",
            )
            .bind(booking_id)
            .bind(&reference)
            .bind(reservation.user_id)
            .bind(reservation.showtime_id)
            .bind(receipt.amount)
            .bind(&receipt.receipt_id)
            .execute(&mut *tx)
            .await;

            let inserted = match inserted {
                Ok(result) => result,
                Err(e) if is_unique_violation(&e, "bookings_payment_ref_key") => {
                    // Конкурентная фиксация того же чека успела раньше;
                    // повторная попытка вернёт её бронь как существующую
                    return Err(ApiError::CommitFailure);
                }
                Err(e) => return Err(e.into()),
            };

            if inserted.rows_affected() > 0 {
                break;
            }
            reference_attempts += 1;
            if reference_attempts >= 5 {
                return Err(ApiError::Internal(
                    "could not generate a unique booking reference".to_string(),
                ));
            }
            reference = booking_reference();
        }

        let (_, seat_ids) = self.seat_map.confirm(&mut tx, token, booking_id).await?;

        sqlx::query(
            "INSERT INTO booking_seats (booking_id, seat_id)
             SELECT $1, unnest($2::uuid[])",
        )
        .bind(booking_id)
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE reservations SET state = 'confirmed', updated_at = NOW() WHERE id = $1",
        )
        .bind(reservation.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE payment_transactions SET status = 'applied' WHERE receipt_id = $1")
            .bind(&receipt.receipt_id)
            .execute(&mut *tx)
            .await?;

        let seats = sqlx::query_as::<_, (String, i32)>(
            "SELECT row_label, number FROM seats WHERE id = ANY($1) ORDER BY row_label, number",
        )
        .bind(&seat_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(row, number)| format!("{}{}", row, number))
        .collect();

        tx.commit().await?;

        Ok(BookingConfirmation {
            booking_id,
            reference,
            showtime_id: reservation.showtime_id,
            seats,
            total_amount: receipt.amount,
        })
    }

    async fn existing_confirmation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        receipt: &Receipt,
    ) -> Result<Option<BookingConfirmation>, ApiError> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE payment_ref = $1",
        )
        .bind(&receipt.receipt_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(booking) = booking else {
            return Ok(None);
        };

        let seats = sqlx::query_as::<_, (String, i32)>(
            "SELECT s.row_label, s.number
             FROM booking_seats bs
             JOIN seats s ON s.id = bs.seat_id
             WHERE bs.booking_id = $1
             ORDER BY s.row_label, s.number",
        )
        .bind(booking.id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|(row, number)| format!("{}{}", row, number))
        .collect();

        Ok(Some(BookingConfirmation {
            booking_id: booking.id,
            reference: booking.reference,
            showtime_id: booking.showtime_id,
            seats,
            total_amount: booking.total_amount,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_has_expected_shape() {
        let reference = booking_reference();
        assert!(reference.starts_with("BK-"));
        assert_eq!(reference.len(), 11);
        assert!(reference[3..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn references_are_drawn_from_a_large_space() {
        // 16^8 вариантов; два подряд совпасть не должны
        assert_ne!(booking_reference(), booking_reference());
    }
}
