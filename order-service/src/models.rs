use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{MarketError, MarketResult, OrderStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = shared::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub total_price: BigDecimal,
    pub status: String,
    pub paid: bool,
    pub refunded: bool,
    pub payment_provider: Option<String>,
    pub payment_provider_id: Option<String>,
    pub payment_status: Option<String>,
    pub order_date: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn current_status(&self) -> MarketResult<OrderStatus> {
        self.status.parse().map_err(|_| {
            MarketError::Internal(anyhow::anyhow!(
                "order {} has unknown status {}",
                self.id,
                self.status
            ))
        })
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        user_id == self.buyer_id || user_id == self.seller_id
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = shared::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub total_price: BigDecimal,
    pub status: String,
    pub paid: bool,
    pub refunded: bool,
    pub order_date: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = shared::schema::orders)]
pub struct OrderChanges {
    pub refunded: Option<bool>,
    pub total_price: Option<BigDecimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = shared::schema::order_items)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub listing_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = shared::schema::order_timeline)]
pub struct TimelineEntry {
    pub id: i64,
    pub order_id: Uuid,
    pub status: String,
    pub actor_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = shared::schema::order_timeline)]
pub struct NewTimelineEntry {
    pub order_id: Uuid,
    pub status: String,
    pub actor_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = shared::schema::processed_payments)]
pub struct ProcessedPayment {
    pub provider_id: String,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemView {
    pub listing_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub provider: Option<String>,
    pub provider_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineView {
    pub status: String,
    pub at: DateTime<Utc>,
    pub by: Option<Uuid>,
}

/// An order with its line items and timeline, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub items: Vec<LineItemView>,
    pub total_price: BigDecimal,
    pub payment_info: PaymentInfo,
    pub paid: bool,
    pub refunded: bool,
    pub timeline: Vec<TimelineView>,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderView {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        user_id == self.buyer_id || user_id == self.seller_id
    }

    pub fn assemble(order: Order, items: Vec<OrderItem>, timeline: Vec<TimelineEntry>) -> Self {
        Self {
            id: order.id,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            items: items
                .into_iter()
                .map(|item| LineItemView {
                    listing_id: item.listing_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            total_price: order.total_price,
            payment_info: PaymentInfo {
                provider: order.payment_provider,
                provider_id: order.payment_provider_id,
                status: order.payment_status,
            },
            paid: order.paid,
            refunded: order.refunded,
            timeline: timeline
                .into_iter()
                .map(|entry| TimelineView {
                    status: entry.status,
                    at: entry.at,
                    by: entry.actor_id,
                })
                .collect(),
            status: order.status,
            order_date: order.order_date,
            updated_at: order.updated_at,
        }
    }

    /// Assemble views for a batch of orders from their flat item and
    /// timeline rows, keeping the order of `orders`.
    pub fn assemble_all(
        orders: Vec<Order>,
        items: Vec<OrderItem>,
        timeline: Vec<TimelineEntry>,
    ) -> Vec<Self> {
        let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            items_by_order.entry(item.order_id).or_default().push(item);
        }
        let mut timeline_by_order: HashMap<Uuid, Vec<TimelineEntry>> = HashMap::new();
        for entry in timeline {
            timeline_by_order.entry(entry.order_id).or_default().push(entry);
        }

        orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                let timeline = timeline_by_order.remove(&order.id).unwrap_or_default();
                OrderView::assemble(order, items, timeline)
            })
            .collect()
    }
}
