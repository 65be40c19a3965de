use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::offer::OfferStatus;
use crate::order::OrderStatus;

/// State changes announced to the rest of the marketplace through the
/// transactional outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    OrderCreated {
        order_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
        total_price: BigDecimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        actor_id: Option<Uuid>,
    },
    OrderPaid {
        order_id: Uuid,
        provider: String,
        provider_id: String,
    },
    OfferCreated {
        offer_id: Uuid,
        listing_id: Uuid,
        buyer_id: Uuid,
        amount: BigDecimal,
    },
    OfferStatusChanged {
        offer_id: Uuid,
        listing_id: Uuid,
        status: OfferStatus,
        amount: BigDecimal,
    },
}

impl DomainEvent {
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::OrderStatusChanged { order_id, .. }
            | DomainEvent::OrderPaid { order_id, .. } => *order_id,
            DomainEvent::OfferCreated { offer_id, .. }
            | DomainEvent::OfferStatusChanged { offer_id, .. } => *offer_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "OrderCreated",
            DomainEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            DomainEvent::OrderPaid { .. } => "OrderPaid",
            DomainEvent::OfferCreated { .. } => "OfferCreated",
            DomainEvent::OfferStatusChanged { .. } => "OfferStatusChanged",
        }
    }
}

pub fn topic_for(event_type: &str) -> &'static str {
    match event_type {
        "OrderCreated" | "OrderStatusChanged" | "OrderPaid" => "order-events",
        "OfferCreated" | "OfferStatusChanged" => "offer-events",
        _ => "domain-events",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_their_type() {
        let event = DomainEvent::OrderStatusChanged {
            order_id: Uuid::new_v4(),
            status: OrderStatus::Shipped,
            actor_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderStatusChanged");
        assert_eq!(json["status"], "Shipped");
        assert_eq!(topic_for(event.event_type()), "order-events");
    }

    #[test]
    fn offer_events_route_to_offer_topic() {
        let offer_id = Uuid::new_v4();
        let event = DomainEvent::OfferStatusChanged {
            offer_id,
            listing_id: Uuid::new_v4(),
            status: OfferStatus::Accepted,
            amount: BigDecimal::from(80),
        };
        assert_eq!(event.aggregate_id(), offer_id);
        assert_eq!(topic_for(event.event_type()), "offer-events");
        assert_eq!(topic_for("SomethingElse"), "domain-events");
    }
}
