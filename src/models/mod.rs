pub mod user;
pub mod movie;
pub mod showtime;
pub mod seat;
pub mod reservation;
pub mod booking;

pub use user::User;
pub use movie::Movie;
pub use showtime::Showtime;
pub use seat::{Seat, SeatState, SeatType};
pub use reservation::{ConcessionSelection, Reservation, ReservationState};
pub use booking::Booking;
