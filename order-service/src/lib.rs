pub mod api;
pub mod lifecycle;
pub mod models;
pub mod payments;
pub mod queries;
pub mod reservation;
