//! Domain types, storage plumbing and cross-service helpers shared by the
//! order and offer services.

pub mod caller;
pub mod catalog;
pub mod db;
pub mod error;
pub mod events;
pub mod extract;
pub mod offer;
pub mod order;
pub mod outbox;
pub mod schema;

pub use caller::Caller;
pub use db::DbPool;
pub use error::{ErrorResponse, MarketError, MarketResult};
pub use events::DomainEvent;
pub use offer::{OfferAction, OfferStats, OfferStatus};
pub use order::{ListingStatus, OrderStatus, Stock, TransitionPolicy};
