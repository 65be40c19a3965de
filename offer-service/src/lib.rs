pub mod api;
pub mod models;
pub mod negotiation;
pub mod reaper;
