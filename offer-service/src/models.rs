use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{MarketError, MarketResult, OfferStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = shared::schema::offers)]
pub struct Offer {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub offer_amount: BigDecimal,
    pub original_price: BigDecimal,
    pub message: Option<String>,
    pub status: String,
    pub counter_amount: Option<BigDecimal>,
    pub counter_message: Option<String>,
    pub counter_created_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn current_status(&self) -> MarketResult<OfferStatus> {
        self.status.parse().map_err(|_| {
            MarketError::Internal(anyhow::anyhow!(
                "offer {} has unknown status {}",
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
#[diesel(table_name = shared::schema::offers)]
pub struct NewOffer {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub offer_amount: BigDecimal,
    pub original_price: BigDecimal,
    pub message: Option<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

/// Column updates for a decision on an offer. `None` leaves a column as is.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = shared::schema::offers)]
pub struct OfferChanges {
    pub status: Option<String>,
    pub offer_amount: Option<BigDecimal>,
    pub message: Option<String>,
    pub counter_amount: Option<BigDecimal>,
    pub counter_message: Option<String>,
    pub counter_created_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOfferView {
    pub amount: BigDecimal,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferView {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub offer_amount: BigDecimal,
    pub original_price: BigDecimal,
    pub message: Option<String>,
    pub status: String,
    pub counter_offer: Option<CounterOfferView>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Offer> for OfferView {
    fn from(offer: Offer) -> Self {
        let counter_offer = match (offer.counter_amount, offer.counter_created_at) {
            (Some(amount), Some(created_at)) => Some(CounterOfferView {
                amount,
                message: offer.counter_message,
                created_at,
            }),
            _ => None,
        };

        Self {
            id: offer.id,
            listing_id: offer.listing_id,
            buyer_id: offer.buyer_id,
            seller_id: offer.seller_id,
            offer_amount: offer.offer_amount,
            original_price: offer.original_price,
            message: offer.message,
            status: offer.status,
            counter_offer,
            responded_at: offer.responded_at,
            expires_at: offer.expires_at,
            created_at: offer.created_at,
            updated_at: offer.updated_at,
        }
    }
}
