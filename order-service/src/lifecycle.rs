//! Order status transitions and their compensating stock actions.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shared::catalog;
use shared::order::order_total;
use shared::outbox;
use shared::schema::{order_items, orders};
use shared::{DbPool, DomainEvent, MarketError, MarketResult, OrderStatus, TransitionPolicy};
use tracing::info;
use uuid::Uuid;

use crate::models::*;
use crate::queries;

pub const DEFAULT_SUMMARY_DAYS: i64 = 30;
pub const MAX_SUMMARY_DAYS: i64 = 3650;
pub const MAX_LIST_LIMIT: i64 = 200;

/// Non-status fields a caller may change on an existing order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderPatch {
    pub refunded: Option<bool>,
    #[serde(default)]
    pub recalculate_total: bool,
    /// Present only so that status changes sent here can be refused.
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub buyer_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub seller_id: Uuid,
    pub window_days: i64,
    pub orders: i64,
    pub revenue: BigDecimal,
    pub units_sold: i64,
}

pub struct OrderLifecycle {
    pool: DbPool,
    policy: TransitionPolicy,
}

impl OrderLifecycle {
    pub fn new(pool: DbPool, policy: TransitionPolicy) -> Self {
        Self { pool, policy }
    }

    pub async fn set_status(
        &self,
        order_id: Uuid,
        target: &str,
        actor_id: Uuid,
    ) -> MarketResult<OrderView> {
        let target: OrderStatus = target.parse()?;
        let policy = self.policy;

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let order = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move {
                    let order = queries::lock_order(conn, order_id).await?;
                    if target == OrderStatus::Shipped && actor_id != order.seller_id {
                        return Err(MarketError::forbidden(
                            "only the seller can mark an order as shipped",
                        ));
                    }
                    apply_transition(conn, policy, order, target, actor_id).await
                })
            })
            .await?;

        info!("Order {} moved to {} by {}", order_id, target, actor_id);
        Ok(order)
    }

    /// Cancellation requested through the order's delete endpoint. Orders
    /// are never removed; they end up Cancelled with their stock restored.
    pub async fn cancel(&self, order_id: Uuid, actor_id: Uuid) -> MarketResult<OrderView> {
        let policy = self.policy;

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let order = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move {
                    let order = queries::lock_order(conn, order_id).await?;
                    if order.current_status()? == OrderStatus::Shipped && actor_id != order.seller_id {
                        return Err(MarketError::forbidden(
                            "only the seller can cancel an order that has shipped",
                        ));
                    }
                    apply_transition(conn, policy, order, OrderStatus::Cancelled, actor_id).await
                })
            })
            .await?;

        info!("Order {} cancelled by {}", order_id, actor_id);
        Ok(order)
    }

    pub async fn update_order(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        patch: OrderPatch,
    ) -> MarketResult<OrderView> {
        if patch.status.is_some() {
            return Err(MarketError::validation(
                "order status can only be changed through the status endpoint",
            ));
        }

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let order = queries::lock_order(conn, order_id).await?;
                if !order.is_party(actor_id) {
                    return Err(MarketError::forbidden(
                        "only the buyer or seller can update this order",
                    ));
                }

                let total_price = if patch.recalculate_total {
                    let items = queries::load_items(conn, order_id).await?;
                    Some(order_total(items.iter().map(|i| (i.quantity, &i.unit_price))))
                } else {
                    None
                };

                let changes = OrderChanges {
                    refunded: patch.refunded,
                    total_price,
                    updated_at: Some(Utc::now()),
                };
                diesel::update(orders::table.filter(orders::id.eq(order_id)))
                    .set(&changes)
                    .execute(conn)
                    .await?;

                queries::load_view(conn, order_id).await
            })
        })
        .await
    }

    pub async fn get_order(&self, order_id: Uuid, actor_id: Uuid) -> MarketResult<OrderView> {
        let mut conn = self.pool.get().await?;
        let order = queries::load_view(&mut conn, order_id).await?;
        if !order.is_party(actor_id) {
            return Err(MarketError::forbidden(
                "only the buyer or seller can view this order",
            ));
        }
        Ok(order)
    }

    /// Orders the actor bought or sold, narrowed by `filter`.
    pub async fn list_orders(
        &self,
        actor_id: Uuid,
        filter: OrderFilter,
    ) -> MarketResult<Vec<OrderView>> {
        let mut conn = self.pool.get().await?;

        let mut query = orders::table
            .filter(orders::buyer_id.eq(actor_id).or(orders::seller_id.eq(actor_id)))
            .into_boxed();
        if let Some(buyer_id) = filter.buyer_id {
            query = query.filter(orders::buyer_id.eq(buyer_id));
        }
        if let Some(seller_id) = filter.seller_id {
            query = query.filter(orders::seller_id.eq(seller_id));
        }

        let found = query
            .order(orders::order_date.desc())
            .limit(filter.limit.clamp(1, MAX_LIST_LIMIT))
            .load::<Order>(&mut conn)
            .await?;

        queries::load_views(&mut conn, found).await
    }

    /// Completed sales (Shipped or Delivered) of a seller over the trailing
    /// `window_days` days.
    pub async fn sales_summary(&self, seller_id: Uuid, window_days: i64) -> MarketResult<SalesSummary> {
        if !(1..=MAX_SUMMARY_DAYS).contains(&window_days) {
            return Err(MarketError::validation(format!(
                "window must be between 1 and {} days",
                MAX_SUMMARY_DAYS
            )));
        }
        let since = Utc::now() - Duration::days(window_days);
        let completed = vec![OrderStatus::Shipped.as_str(), OrderStatus::Delivered.as_str()];

        let mut conn = self.pool.get().await?;

        let (order_count, revenue) = orders::table
            .filter(orders::seller_id.eq(seller_id))
            .filter(orders::order_date.ge(since))
            .filter(orders::status.eq_any(completed.clone()))
            .select((count_star(), sum(orders::total_price)))
            .get_result::<(i64, Option<BigDecimal>)>(&mut conn)
            .await?;

        let units_sold = order_items::table
            .inner_join(orders::table)
            .filter(orders::seller_id.eq(seller_id))
            .filter(orders::order_date.ge(since))
            .filter(orders::status.eq_any(completed))
            .select(sum(order_items::quantity))
            .get_result::<Option<i64>>(&mut conn)
            .await?;

        Ok(SalesSummary {
            seller_id,
            window_days,
            orders: order_count,
            revenue: revenue.unwrap_or_else(BigDecimal::zero),
            units_sold: units_sold.unwrap_or(0),
        })
    }
}

/// Move a locked order to `target`, applying the stock side effects and
/// recording the step in the timeline and the outbox.
async fn apply_transition(
    conn: &mut AsyncPgConnection,
    policy: TransitionPolicy,
    order: Order,
    target: OrderStatus,
    actor_id: Uuid,
) -> MarketResult<OrderView> {
    policy.check(order.current_status()?, target)?;

    match target {
        OrderStatus::Cancelled => {
            for item in queries::load_items(conn, order.id).await? {
                let listing = catalog::lock_listing(conn, item.listing_id).await?;
                let stock = listing.stock()?.restore(item.quantity);
                catalog::save_stock(conn, &stock).await?;
            }
        }
        OrderStatus::Delivered => {
            for item in queries::load_items(conn, order.id).await? {
                let listing = catalog::lock_listing(conn, item.listing_id).await?;
                let stock = listing.stock()?.consume();
                catalog::save_stock(conn, &stock).await?;
            }
        }
        OrderStatus::Pending | OrderStatus::Shipped => {}
    }

    diesel::update(orders::table.filter(orders::id.eq(order.id)))
        .set((
            orders::status.eq(target.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

    queries::append_timeline(conn, order.id, target.as_str(), Some(actor_id)).await?;

    outbox::enqueue(
        conn,
        &DomainEvent::OrderStatusChanged {
            order_id: order.id,
            status: target,
            actor_id: Some(actor_id),
        },
    )
    .await?;

    queries::load_view(conn, order.id).await
}
