//! Offer negotiation state machine.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::order::validate_money;

pub const MAX_MESSAGE_LEN: usize = 500;
pub const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Withdrawn,
    Expired,
}

impl OfferStatus {
    /// Statuses still awaiting a decision.
    pub const OPEN: [OfferStatus; 2] = [OfferStatus::Pending, OfferStatus::Countered];

    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Countered => "countered",
            OfferStatus::Withdrawn => "withdrawn",
            OfferStatus::Expired => "expired",
        }
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn transition(self, action: OfferAction) -> MarketResult<OfferStatus> {
        use OfferStatus::*;

        match (action, self) {
            (OfferAction::Accept, Pending | Countered) => Ok(Accepted),
            (OfferAction::Reject, Pending | Countered) => Ok(Rejected),
            (OfferAction::Counter, Pending) => Ok(Countered),
            (OfferAction::Counter, Countered) => {
                Err(MarketError::conflict("offer has already been countered"))
            }
            (OfferAction::AcceptCounter, Countered) => Ok(Accepted),
            (OfferAction::AcceptCounter, _) => {
                Err(MarketError::conflict("offer has no open counter-offer"))
            }
            (OfferAction::Withdraw, Pending | Countered) => Ok(Withdrawn),
            (OfferAction::Withdraw, Accepted) => {
                Err(MarketError::conflict("an accepted offer cannot be withdrawn"))
            }
            (OfferAction::Expire, Pending | Countered) => Ok(Expired),
            (OfferAction::Accept | OfferAction::Reject | OfferAction::Counter, _) => {
                Err(MarketError::conflict("offer is no longer pending"))
            }
            (OfferAction::Withdraw | OfferAction::Expire, _) => {
                Err(MarketError::conflict("offer is no longer open"))
            }
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OfferStatus::Pending),
            "accepted" => Ok(OfferStatus::Accepted),
            "rejected" => Ok(OfferStatus::Rejected),
            "countered" => Ok(OfferStatus::Countered),
            "withdrawn" => Ok(OfferStatus::Withdrawn),
            "expired" => Ok(OfferStatus::Expired),
            other => Err(MarketError::Internal(anyhow::anyhow!(
                "unknown offer status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Accept,
    Reject,
    Counter,
    AcceptCounter,
    Withdraw,
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
}

impl OfferAction {
    /// The party allowed to drive this action. Expiry is driven by the
    /// reaper and has no party.
    pub fn party(&self) -> Option<Party> {
        match self {
            OfferAction::Accept | OfferAction::Reject | OfferAction::Counter => Some(Party::Seller),
            OfferAction::AcceptCounter | OfferAction::Withdraw => Some(Party::Buyer),
            OfferAction::Expire => None,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            OfferAction::Accept => "accept",
            OfferAction::Reject => "reject",
            OfferAction::Counter => "counter",
            OfferAction::AcceptCounter => "accept the counter-offer on",
            OfferAction::Withdraw => "withdraw",
            OfferAction::Expire => "expire",
        }
    }

    pub fn authorize(&self, actor: Uuid, buyer_id: Uuid, seller_id: Uuid) -> MarketResult<()> {
        match self.party() {
            Some(Party::Seller) if actor != seller_id => Err(MarketError::forbidden(format!(
                "only the seller can {} this offer",
                self.verb()
            ))),
            Some(Party::Buyer) if actor != buyer_id => Err(MarketError::forbidden(format!(
                "only the buyer can {} this offer",
                self.verb()
            ))),
            _ => Ok(()),
        }
    }
}

pub fn validate_amount(amount: &BigDecimal, field: &str) -> MarketResult<()> {
    if amount <= &BigDecimal::zero() {
        return Err(MarketError::validation(format!("{} must be greater than zero", field)));
    }
    validate_money(amount, field)
}

pub fn validate_message(message: Option<&str>) -> MarketResult<()> {
    match message {
        Some(m) if m.chars().count() > MAX_MESSAGE_LEN => Err(MarketError::validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_LEN
        ))),
        _ => Ok(()),
    }
}

/// Offer counts per status for one seller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferStats {
    pub pending: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub countered: i64,
    pub withdrawn: i64,
    pub expired: i64,
    pub total: i64,
}

impl OfferStats {
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let mut stats = OfferStats::default();
        for (status, count) in counts {
            let slot = match status.as_ref().parse::<OfferStatus>() {
                Ok(OfferStatus::Pending) => &mut stats.pending,
                Ok(OfferStatus::Accepted) => &mut stats.accepted,
                Ok(OfferStatus::Rejected) => &mut stats.rejected,
                Ok(OfferStatus::Countered) => &mut stats.countered,
                Ok(OfferStatus::Withdrawn) => &mut stats.withdrawn,
                Ok(OfferStatus::Expired) => &mut stats.expired,
                Err(_) => continue,
            };
            *slot += count;
            stats.total += count;
        }
        stats
    }
}
