use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{MarketError, MarketResult};
use crate::events::{topic_for, DomainEvent};
use crate::schema::outbox_events;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn from_event(event: &DomainEvent) -> MarketResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event).map_err(anyhow::Error::from)?,
        })
    }
}

/// Record an event in the outbox. Call inside the transaction that made the
/// change so the event is published if and only if the change commits.
pub async fn enqueue(conn: &mut AsyncPgConnection, event: &DomainEvent) -> MarketResult<()> {
    let row = NewOutboxEvent::from_event(event)?;
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await
        .map_err(MarketError::from)?;
    Ok(())
}

pub fn connect_producer(brokers: &str) -> Result<FutureProducer> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()?;
    Ok(producer)
}

pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    interval: Duration,
    batch_size: i64,
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer, interval: Duration) -> Self {
        Self {
            pool,
            producer,
            interval,
            batch_size: 100,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publish one batch. Rows are claimed with `SKIP LOCKED` so that every
    /// service instance can run a processor against the shared table.
    async fn process_outbox_events(&self) -> Result<usize> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let producer = &self.producer;
        let batch_size = self.batch_size;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let unprocessed_events = outbox_events::table
                    .filter(outbox_events::processed.eq(false))
                    .order(outbox_events::created_at.asc())
                    .limit(batch_size)
                    .for_update()
                    .skip_locked()
                    .load::<DbOutboxEvent>(conn)
                    .await?;

                let mut published = 0;
                for event in unprocessed_events {
                    if let Err(e) = publish_event(producer, &event).await {
                        error!("Failed to publish event {}: {}", event.id, e);
                        continue;
                    }

                    diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
                        .set(outbox_events::processed.eq(true))
                        .execute(conn)
                        .await?;

                    info!("Published outbox event: {}", event.id);
                    published += 1;
                }

                Ok(published)
            })
        })
        .await
    }
}

async fn publish_event(producer: &FutureProducer, event: &DbOutboxEvent) -> Result<()> {
    let topic = topic_for(&event.event_type);
    let json = serde_json::to_string(&event.event_data)?;
    let key = event.aggregate_id.to_string();
    let record = FutureRecord::to(topic).payload(&json).key(&key);

    producer
        .send(record, Duration::from_secs(5))
        .await
        .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

    Ok(())
}
