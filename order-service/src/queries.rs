//! Order reads and timeline writes used by every order workflow.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::schema::{order_items, order_timeline, orders};
use shared::{MarketError, MarketResult};
use uuid::Uuid;

use crate::models::*;

pub async fn find_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> MarketResult<Order> {
    orders::table
        .filter(orders::id.eq(order_id))
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or_else(|| MarketError::not_found(format!("order {} not found", order_id)))
}

/// Fetch an order with `FOR UPDATE` so concurrent transitions of the same
/// order serialize.
pub async fn lock_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> MarketResult<Order> {
    orders::table
        .filter(orders::id.eq(order_id))
        .for_update()
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or_else(|| MarketError::not_found(format!("order {} not found", order_id)))
}

pub async fn load_items(conn: &mut AsyncPgConnection, order_id: Uuid) -> MarketResult<Vec<OrderItem>> {
    let items = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .order(order_items::listing_id.asc())
        .load::<OrderItem>(conn)
        .await?;
    Ok(items)
}

pub async fn append_timeline(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    status: &str,
    actor_id: Option<Uuid>,
) -> MarketResult<TimelineEntry> {
    let entry = NewTimelineEntry {
        order_id,
        status: status.to_string(),
        actor_id,
        at: Utc::now(),
    };

    let row = diesel::insert_into(order_timeline::table)
        .values(&entry)
        .get_result::<TimelineEntry>(conn)
        .await?;
    Ok(row)
}

pub async fn load_view(conn: &mut AsyncPgConnection, order_id: Uuid) -> MarketResult<OrderView> {
    let order = find_order(conn, order_id).await?;
    let items = load_items(conn, order_id).await?;
    let timeline = order_timeline::table
        .filter(order_timeline::order_id.eq(order_id))
        .order(order_timeline::id.asc())
        .load::<TimelineEntry>(conn)
        .await?;
    Ok(OrderView::assemble(order, items, timeline))
}

pub async fn load_views(conn: &mut AsyncPgConnection, orders: Vec<Order>) -> MarketResult<Vec<OrderView>> {
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

    let items = order_items::table
        .filter(order_items::order_id.eq_any(ids.clone()))
        .order(order_items::listing_id.asc())
        .load::<OrderItem>(conn)
        .await?;
    let timeline = order_timeline::table
        .filter(order_timeline::order_id.eq_any(ids))
        .order(order_timeline::id.asc())
        .load::<TimelineEntry>(conn)
        .await?;

    Ok(OrderView::assemble_all(orders, items, timeline))
}
