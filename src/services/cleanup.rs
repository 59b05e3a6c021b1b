//! Фоновая очистка истёкших аренд.
//!
//! Истёкшая аренда и так видна как свободное место (ленивая проверка в
//! карте зала), но фоновый проход возвращает строки в open, помечает
//! аренды отозванными и переводит осиротевшие бронирования в abandoned,
//! чтобы карта зала и статистика не расходились с реальностью.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::AppState;

pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Один проход очистки: аренды -> места -> бронирования.
    pub async fn run_sweep(&self) {
        let mut tx = match self.state.db.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("Failed to start cleanup transaction: {}", e);
                return;
            }
        };

        // 1) Помечаем истёкшие аренды отозванными
        let tokens: Vec<Uuid> = match sqlx::query_scalar(
            "UPDATE holds
             SET released = TRUE
             WHERE expires_at < NOW() AND consumed_by IS NULL AND NOT released
             RETURNING token",
        )
        .fetch_all(&mut *tx)
        .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to expire holds: {}", e);
                let _ = tx.rollback().await;
                return;
            }
        };

        if tokens.is_empty() {
            let _ = tx.rollback().await;
            info!("🧹 No expired holds to sweep");
            return;
        }

        // 2) Возвращаем их места в open
        let showtimes: Vec<Uuid> = match sqlx::query_scalar(
            "UPDATE seats
             SET state = 'open', hold_token = NULL, hold_expires_at = NULL, booking_id = NULL
             WHERE hold_token = ANY($1) AND state = 'held'
             RETURNING showtime_id",
        )
        .bind(&tokens)
        .fetch_all(&mut *tx)
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to free seats for expired holds: {}", e);
                let _ = tx.rollback().await;
                return;
            }
        };

        // 3) Бронирования, потерявшие аренду, уходят в abandoned
        let abandoned: Vec<Uuid> = match sqlx::query_scalar(
            "UPDATE reservations
             SET state = 'abandoned', updated_at = NOW()
             WHERE hold_token = ANY($1)
               AND state IN ('seats_held', 'selecting_concessions', 'awaiting_payment')
             RETURNING id",
        )
        .bind(&tokens)
        .fetch_all(&mut *tx)
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to abandon stale reservations: {}", e);
                let _ = tx.rollback().await;
                return;
            }
        };

        // Списанный, но не применённый чек у брошенного бронирования -
        // сигнал оператору: платёж есть, брони нет
        let orphaned_receipts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payment_transactions
             WHERE reservation_id = ANY($1) AND status = 'captured'",
        )
        .bind(&abandoned)
        .fetch_one(&mut *tx)
        .await
        .unwrap_or(0);

        if tx.commit().await.is_err() {
            error!("Failed to commit cleanup transaction");
            return;
        }

        let mut affected = showtimes;
        affected.sort();
        affected.dedup();
        for showtime_id in &affected {
            self.state.cache.invalidate_seats(*showtime_id).await;
        }

        info!(
            "🧹 Sweep released {} holds, {} reservations abandoned, {} showtimes invalidated",
            tokens.len(),
            abandoned.len(),
            affected.len()
        );

        if orphaned_receipts > 0 {
            error!(
                "💳 {} captured receipts belong to abandoned reservations - manual reconciliation required",
                orphaned_receipts
            );
        }
    }
}
