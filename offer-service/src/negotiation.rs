//! Offer negotiation between a listing's seller and its prospective buyers.
//!
//! Every decision locks the listing row first and then the offer row, so
//! decisions on offers for the same listing are serialized and at most one
//! offer per listing ever ends up accepted.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::catalog::{self, Listing};
use shared::offer::{validate_amount, validate_message, OfferAction};
use shared::outbox;
use shared::schema::offers;
use shared::{DbPool, DomainEvent, MarketError, MarketResult, OfferStats, OfferStatus};
use tracing::info;
use uuid::Uuid;

use crate::models::*;

pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOfferRequest {
    pub listing_id: Uuid,
    pub amount: BigDecimal,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferScope {
    /// Offers on one listing: all of them for its seller, the caller's own
    /// otherwise.
    Listing(Uuid),
    Sent,
    Received,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Accept,
    Reject { message: Option<String> },
    Counter { amount: BigDecimal, message: Option<String> },
    AcceptCounter,
    Withdraw,
}

impl Decision {
    pub fn action(&self) -> OfferAction {
        match self {
            Decision::Accept => OfferAction::Accept,
            Decision::Reject { .. } => OfferAction::Reject,
            Decision::Counter { .. } => OfferAction::Counter,
            Decision::AcceptCounter => OfferAction::AcceptCounter,
            Decision::Withdraw => OfferAction::Withdraw,
        }
    }

    fn validate(&self) -> MarketResult<()> {
        match self {
            Decision::Reject { message } => validate_message(message.as_deref()),
            Decision::Counter { amount, message } => {
                validate_amount(amount, "counter amount")?;
                validate_message(message.as_deref())
            }
            Decision::Accept | Decision::AcceptCounter | Decision::Withdraw => Ok(()),
        }
    }

    fn changes(self, offer: &Offer, status: OfferStatus, now: DateTime<Utc>) -> MarketResult<OfferChanges> {
        let mut changes = OfferChanges {
            status: Some(status.as_str().to_string()),
            updated_at: Some(now),
            ..Default::default()
        };

        match self {
            Decision::Accept => changes.responded_at = Some(now),
            Decision::Reject { message } => {
                changes.message = message;
                changes.responded_at = Some(now);
            }
            Decision::Counter { amount, message } => {
                changes.counter_amount = Some(amount);
                changes.counter_message = message;
                changes.counter_created_at = Some(now);
                changes.responded_at = Some(now);
            }
            Decision::AcceptCounter => {
                let agreed = offer.counter_amount.clone().ok_or_else(|| {
                    MarketError::Internal(anyhow::anyhow!(
                        "countered offer {} has no counter amount",
                        offer.id
                    ))
                })?;
                changes.offer_amount = Some(agreed);
                changes.responded_at = Some(now);
            }
            Decision::Withdraw => changes.responded_at = Some(now),
        }

        Ok(changes)
    }
}

pub struct OfferEngine {
    pool: DbPool,
    ttl: Duration,
}

impl OfferEngine {
    pub fn new(pool: DbPool, ttl_days: i64) -> Self {
        Self {
            pool,
            ttl: Duration::days(ttl_days),
        }
    }

    pub async fn create_offer(&self, buyer_id: Uuid, request: NewOfferRequest) -> MarketResult<OfferView> {
        validate_amount(&request.amount, "amount")?;
        validate_message(request.message.as_deref())?;
        let expires_at = Utc::now() + self.ttl;

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let offer = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move {
                    catalog::require_user(conn, buyer_id, "buyer").await?;
                    let listing = catalog::require_listing(conn, request.listing_id).await?;
                    if listing.seller_id == buyer_id {
                        return Err(MarketError::validation(
                            "cannot make an offer on your own listing",
                        ));
                    }

                    let pending = offers::table
                        .filter(offers::listing_id.eq(listing.id))
                        .filter(offers::buyer_id.eq(buyer_id))
                        .filter(offers::status.eq(OfferStatus::Pending.as_str()))
                        .select(count_star())
                        .get_result::<i64>(conn)
                        .await?;
                    if pending > 0 {
                        return Err(MarketError::conflict(
                            "you already have a pending offer on this listing",
                        ));
                    }

                    let new_offer = NewOffer {
                        id: Uuid::new_v4(),
                        listing_id: listing.id,
                        buyer_id,
                        seller_id: listing.seller_id,
                        offer_amount: request.amount,
                        original_price: listing.price,
                        message: request.message,
                        status: OfferStatus::Pending.as_str().to_string(),
                        expires_at,
                    };

                    // A racing duplicate trips the partial unique index and
                    // surfaces as a conflict.
                    let offer = diesel::insert_into(offers::table)
                        .values(&new_offer)
                        .get_result::<Offer>(conn)
                        .await?;

                    outbox::enqueue(
                        conn,
                        &DomainEvent::OfferCreated {
                            offer_id: offer.id,
                            listing_id: offer.listing_id,
                            buyer_id: offer.buyer_id,
                            amount: offer.offer_amount.clone(),
                        },
                    )
                    .await?;

                    Ok(offer)
                })
            })
            .await?;

        info!(
            "Offer {} of {} placed on listing {} by {}",
            offer.id, offer.offer_amount, offer.listing_id, buyer_id
        );
        Ok(offer.into())
    }

    pub async fn accept_offer(&self, offer_id: Uuid, seller_id: Uuid) -> MarketResult<OfferView> {
        self.decide(offer_id, seller_id, Decision::Accept).await
    }

    pub async fn reject_offer(
        &self,
        offer_id: Uuid,
        seller_id: Uuid,
        message: Option<String>,
    ) -> MarketResult<OfferView> {
        self.decide(offer_id, seller_id, Decision::Reject { message })
            .await
    }

    pub async fn counter_offer(
        &self,
        offer_id: Uuid,
        seller_id: Uuid,
        amount: BigDecimal,
        message: Option<String>,
    ) -> MarketResult<OfferView> {
        self.decide(offer_id, seller_id, Decision::Counter { amount, message })
            .await
    }

    pub async fn accept_counter_offer(&self, offer_id: Uuid, buyer_id: Uuid) -> MarketResult<OfferView> {
        self.decide(offer_id, buyer_id, Decision::AcceptCounter).await
    }

    pub async fn withdraw_offer(&self, offer_id: Uuid, buyer_id: Uuid) -> MarketResult<OfferView> {
        self.decide(offer_id, buyer_id, Decision::Withdraw).await
    }

    /// Apply a party's decision to an offer. Acceptance also rejects every
    /// other open offer on the listing, in the same transaction.
    pub async fn decide(&self, offer_id: Uuid, actor_id: Uuid, decision: Decision) -> MarketResult<OfferView> {
        decision.validate()?;
        let action = decision.action();

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let (offer, rejected) = conn
            .transaction::<_, MarketError, _>(|conn| {
                Box::pin(async move {
                    let (listing, offer) = lock_for_decision(conn, offer_id).await?;
                    action.authorize(actor_id, offer.buyer_id, listing.seller_id)?;
                    let status = offer.current_status()?.transition(action)?;

                    let now = Utc::now();
                    let changes = decision.changes(&offer, status, now)?;
                    let offer = diesel::update(offers::table.filter(offers::id.eq(offer_id)))
                        .set(&changes)
                        .get_result::<Offer>(conn)
                        .await?;

                    let mut events = vec![DomainEvent::OfferStatusChanged {
                        offer_id: offer.id,
                        listing_id: offer.listing_id,
                        status,
                        amount: offer.offer_amount.clone(),
                    }];

                    let rejected = if status == OfferStatus::Accepted {
                        reject_siblings(conn, &offer, now).await?
                    } else {
                        Vec::new()
                    };
                    events.extend(rejected.iter().map(|(id, amount)| {
                        DomainEvent::OfferStatusChanged {
                            offer_id: *id,
                            listing_id: offer.listing_id,
                            status: OfferStatus::Rejected,
                            amount: amount.clone(),
                        }
                    }));

                    for event in &events {
                        outbox::enqueue(conn, event).await?;
                    }

                    Ok((offer, rejected.len()))
                })
            })
            .await?;

        info!("Offer {} is now {} ({:?} by {})", offer.id, offer.status, action, actor_id);
        if rejected > 0 {
            info!(
                "Rejected {} other open offers on listing {}",
                rejected, offer.listing_id
            );
        }
        Ok(offer.into())
    }

    pub async fn get_offer(&self, offer_id: Uuid, actor_id: Uuid) -> MarketResult<OfferView> {
        let mut conn = self.pool.get().await?;
        let offer = find_offer(&mut conn, offer_id).await?;
        if !offer.is_party(actor_id) {
            return Err(MarketError::forbidden(
                "only the buyer or the seller can view this offer",
            ));
        }
        Ok(offer.into())
    }

    pub async fn list_offers(
        &self,
        actor_id: Uuid,
        scope: OfferScope,
        limit: i64,
    ) -> MarketResult<Vec<OfferView>> {
        let mut conn = self.pool.get().await?;

        let query = offers::table.into_boxed();
        let query = match scope {
            OfferScope::Listing(listing_id) => {
                let listing = catalog::require_listing(&mut conn, listing_id).await?;
                let query = query.filter(offers::listing_id.eq(listing_id));
                if listing.seller_id == actor_id {
                    query
                } else {
                    query.filter(offers::buyer_id.eq(actor_id))
                }
            }
            OfferScope::Sent => query.filter(offers::buyer_id.eq(actor_id)),
            OfferScope::Received => query.filter(offers::seller_id.eq(actor_id)),
        };

        let found = query
            .order(offers::created_at.desc())
            .limit(limit.clamp(1, MAX_LIST_LIMIT))
            .load::<Offer>(&mut conn)
            .await?;

        Ok(found.into_iter().map(OfferView::from).collect())
    }

    pub async fn offer_stats(&self, seller_id: Uuid) -> MarketResult<OfferStats> {
        let mut conn = self.pool.get().await?;

        let counts = offers::table
            .filter(offers::seller_id.eq(seller_id))
            .group_by(offers::status)
            .select((offers::status, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(OfferStats::from_counts(counts))
    }

    /// Move every open offer whose deadline passed before `now` to expired.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> MarketResult<usize> {
        let open: Vec<&str> = OfferStatus::OPEN.iter().map(|s| s.as_str()).collect();

        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let expired = diesel::update(
                    offers::table
                        .filter(offers::status.eq_any(open))
                        .filter(offers::expires_at.lt(now)),
                )
                .set((
                    offers::status.eq(OfferStatus::Expired.as_str()),
                    offers::updated_at.eq(now),
                ))
                .returning((offers::id, offers::listing_id, offers::offer_amount))
                .get_results::<(Uuid, Uuid, BigDecimal)>(conn)
                .await?;

                for (offer_id, listing_id, amount) in &expired {
                    outbox::enqueue(
                        conn,
                        &DomainEvent::OfferStatusChanged {
                            offer_id: *offer_id,
                            listing_id: *listing_id,
                            status: OfferStatus::Expired,
                            amount: amount.clone(),
                        },
                    )
                    .await?;
                }

                Ok(expired.len())
            })
        })
        .await
    }
}

async fn find_offer(conn: &mut AsyncPgConnection, offer_id: Uuid) -> MarketResult<Offer> {
    offers::table
        .filter(offers::id.eq(offer_id))
        .first::<Offer>(conn)
        .await
        .optional()?
        .ok_or_else(|| MarketError::not_found(format!("offer {} not found", offer_id)))
}

/// Lock the offer's listing, then re-read the offer under its own row lock.
async fn lock_for_decision(conn: &mut AsyncPgConnection, offer_id: Uuid) -> MarketResult<(Listing, Offer)> {
    let listing_id = find_offer(conn, offer_id).await?.listing_id;
    let listing = catalog::lock_listing(conn, listing_id).await?;

    let offer = offers::table
        .filter(offers::id.eq(offer_id))
        .for_update()
        .first::<Offer>(conn)
        .await?;

    Ok((listing, offer))
}

async fn reject_siblings(
    conn: &mut AsyncPgConnection,
    accepted: &Offer,
    now: DateTime<Utc>,
) -> MarketResult<Vec<(Uuid, BigDecimal)>> {
    let open: Vec<&str> = OfferStatus::OPEN.iter().map(|s| s.as_str()).collect();

    let rejected = diesel::update(
        offers::table
            .filter(offers::listing_id.eq(accepted.listing_id))
            .filter(offers::id.ne(accepted.id))
            .filter(offers::status.eq_any(open)),
    )
    .set((
        offers::status.eq(OfferStatus::Rejected.as_str()),
        offers::responded_at.eq(now),
        offers::updated_at.eq(now),
    ))
    .returning((offers::id, offers::offer_amount))
    .get_results::<(Uuid, BigDecimal)>(conn)
    .await?;

    Ok(rejected)
}
