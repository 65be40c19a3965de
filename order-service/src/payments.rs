//! Payment provider webhook handling.
//!
//! The provider reports settled payment intents; each intent id is applied
//! to its order at most once.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::order::PAID_LABEL;
use shared::outbox;
use shared::schema::{orders, processed_payments};
use shared::{DbPool, DomainEvent, MarketError, MarketResult};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::*;
use crate::queries;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const DEFAULT_PROVIDER: &str = "stripe";

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: PaymentIntent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMetadata {
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Recorded,
    Duplicate,
    Ignored,
    OrderMissing,
}

pub struct PaymentRecorder {
    pool: DbPool,
}

impl PaymentRecorder {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record_payment(&self, event: PaymentEvent) -> MarketResult<PaymentOutcome> {
        if event.event_type != PAYMENT_SUCCEEDED {
            info!("Ignoring payment event of type {}", event.event_type);
            return Ok(PaymentOutcome::Ignored);
        }

        let Some(order_id) = event.data.object.metadata.order_id else {
            warn!(
                "Payment intent {} carries no order id, ignoring",
                event.data.object.id
            );
            return Ok(PaymentOutcome::Ignored);
        };
        let provider_id = event.data.object.id;
        let provider = event
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let outcome = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move { apply_payment(conn, order_id, provider, provider_id).await })
            })
            .await?;

        match outcome {
            PaymentOutcome::Recorded => info!("Order {} marked as paid", order_id),
            PaymentOutcome::Duplicate => info!("Payment for order {} already recorded", order_id),
            PaymentOutcome::OrderMissing => warn!("Payment received for unknown order {}", order_id),
            PaymentOutcome::Ignored => {}
        }
        Ok(outcome)
    }
}

async fn apply_payment(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    provider: String,
    provider_id: String,
) -> MarketResult<PaymentOutcome> {
    match queries::lock_order(conn, order_id).await {
        Ok(_) => {}
        Err(MarketError::NotFound(_)) => return Ok(PaymentOutcome::OrderMissing),
        Err(e) => return Err(e),
    }

    let inserted = diesel::insert_into(processed_payments::table)
        .values(&ProcessedPayment {
            provider_id: provider_id.clone(),
            order_id,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Ok(PaymentOutcome::Duplicate);
    }

    diesel::update(orders::table.filter(orders::id.eq(order_id)))
        .set((
            orders::paid.eq(true),
            orders::payment_provider.eq(provider.as_str()),
            orders::payment_provider_id.eq(provider_id.as_str()),
            orders::payment_status.eq("succeeded"),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

    queries::append_timeline(conn, order_id, PAID_LABEL, None).await?;

    outbox::enqueue(
        conn,
        &DomainEvent::OrderPaid {
            order_id,
            provider,
            provider_id,
        },
    )
    .await?;

    Ok(PaymentOutcome::Recorded)
}
