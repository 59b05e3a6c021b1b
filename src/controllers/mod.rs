pub mod bookings;
pub mod catalog;
pub mod reservations;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(catalog::routes())
        .merge(reservations::routes())
        .merge(bookings::routes())
}
