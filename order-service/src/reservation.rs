//! Inventory reservation: turns a cart into an order while taking the
//! ordered quantities out of stock, all in one transaction.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::Serialize;
use shared::catalog;
use shared::order::{order_total, validate_money};
use shared::outbox;
use shared::schema::{order_items, orders};
use shared::{DbPool, DomainEvent, MarketError, MarketResult, OrderStatus};
use tracing::info;
use uuid::Uuid;

use crate::models::*;
use crate::queries;

#[derive(Debug, Clone)]
pub struct LineItemRequest {
    pub listing_id: Uuid,
    pub quantity: i32,
    /// Price agreed elsewhere (e.g. an accepted offer). Falls back to the
    /// listing's current price.
    pub unit_price: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub items: Vec<LineItemRequest>,
}

/// Placeholder handed back until a payment provider is wired in.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInstruction {
    pub provider: String,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub status: String,
}

impl PaymentInstruction {
    fn stub(order: &OrderView) -> Self {
        Self {
            provider: "stub".to_string(),
            order_id: order.id,
            amount: order.total_price.clone(),
            status: "requires_payment".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrder {
    pub order: OrderView,
    pub payment: PaymentInstruction,
}

struct PricedItem {
    listing_id: Uuid,
    quantity: i32,
    unit_price: BigDecimal,
}

pub fn validate_items(items: &[LineItemRequest]) -> MarketResult<()> {
    if items.is_empty() {
        return Err(MarketError::validation("an order needs at least one line item"));
    }
    for item in items {
        if item.quantity < 1 {
            return Err(MarketError::validation(format!(
                "quantity for listing {} must be at least 1",
                item.listing_id
            )));
        }
        if let Some(price) = &item.unit_price {
            if price < &BigDecimal::zero() {
                return Err(MarketError::validation(format!(
                    "price for listing {} cannot be negative",
                    item.listing_id
                )));
            }
            validate_money(price, &format!("price for listing {}", item.listing_id))?;
        }
    }
    Ok(())
}

pub struct InventoryReservation {
    pool: DbPool,
}

impl InventoryReservation {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_order(&self, request: ReservationRequest) -> MarketResult<CreatedOrder> {
        validate_items(&request.items)?;

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let order = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move { reserve_and_record(conn, request).await })
            })
            .await?;

        info!(
            "Order {} created for buyer {} ({} items, total {})",
            order.id,
            order.buyer_id,
            order.items.len(),
            order.total_price
        );

        Ok(CreatedOrder {
            payment: PaymentInstruction::stub(&order),
            order,
        })
    }
}

async fn reserve_and_record(
    conn: &mut AsyncPgConnection,
    request: ReservationRequest,
) -> MarketResult<OrderView> {
    catalog::require_user(conn, request.buyer_id, "buyer").await?;
    catalog::require_user(conn, request.seller_id, "seller").await?;

    let mut priced = Vec::with_capacity(request.items.len());
    for item in request.items {
        let unit_price = match item.unit_price {
            Some(price) => price,
            None => catalog::require_listing(conn, item.listing_id).await?.price,
        };
        priced.push(PricedItem {
            listing_id: item.listing_id,
            quantity: item.quantity,
            unit_price,
        });
    }
    let total_price = order_total(priced.iter().map(|item| (item.quantity, &item.unit_price)));

    // Lock listings in id order so two carts sharing listings cannot deadlock.
    let mut lock_order: Vec<&PricedItem> = priced.iter().collect();
    lock_order.sort_by_key(|item| item.listing_id);
    for item in lock_order {
        let listing = catalog::lock_listing(conn, item.listing_id).await?;
        let stock = listing.stock()?.reserve(item.quantity)?;
        catalog::save_stock(conn, &stock).await?;
    }

    let new_order = NewOrder {
        id: Uuid::new_v4(),
        buyer_id: request.buyer_id,
        seller_id: request.seller_id,
        total_price,
        status: OrderStatus::Pending.as_str().to_string(),
        paid: false,
        refunded: false,
        order_date: Utc::now(),
    };

    let order = diesel::insert_into(orders::table)
        .values(&new_order)
        .get_result::<Order>(conn)
        .await?;

    let rows: Vec<OrderItem> = priced
        .into_iter()
        .map(|item| OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            listing_id: item.listing_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect();

    let items = diesel::insert_into(order_items::table)
        .values(&rows)
        .get_results::<OrderItem>(conn)
        .await?;

    let created = queries::append_timeline(
        conn,
        order.id,
        OrderStatus::Pending.as_str(),
        Some(request.buyer_id),
    )
    .await?;

    outbox::enqueue(
        conn,
        &DomainEvent::OrderCreated {
            order_id: order.id,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            total_price: order.total_price.clone(),
        },
    )
    .await?;

    Ok(OrderView::assemble(order, items, vec![created]))
}
