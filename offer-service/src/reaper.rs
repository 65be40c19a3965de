//! Background expiry of offers left unanswered past their deadline.

use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, info};

use crate::negotiation::OfferEngine;

pub struct OfferReaper {
    engine: OfferEngine,
    interval: Duration,
}

impl OfferReaper {
    pub fn new(engine: OfferEngine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.engine.expire_due(Utc::now()).await {
                Ok(0) => {}
                Ok(expired) => info!("Expired {} overdue offers", expired),
                Err(e) => error!("Error expiring offers: {}", e),
            }
        }
    }
}
