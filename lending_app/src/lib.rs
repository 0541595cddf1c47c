pub mod backend;
pub mod booking_form;
pub mod bookings;
pub mod equipment;
pub mod loans;
pub mod query;
pub mod refresh;
pub mod session;
