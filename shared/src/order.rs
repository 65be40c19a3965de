//! Order status machine and listing stock arithmetic.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};

/// Timeline label written when a payment event settles an order.
pub const PAID_LABEL: &str = "Paid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MarketError::validation(format!("invalid order status: {}", s)))
    }
}

/// Which status edges an order may take.
///
/// Delivered and Cancelled are final under every policy: leaving them would
/// reserve or restore stock a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Any status may follow a non-terminal one.
    #[default]
    Lenient,
    /// Pending -> Shipped | Cancelled, Shipped -> Delivered | Cancelled.
    Strict,
}

impl TransitionPolicy {
    pub fn check(&self, from: OrderStatus, to: OrderStatus) -> MarketResult<()> {
        if from.is_terminal() {
            return Err(MarketError::conflict(format!("order is already {}", from)));
        }

        let allowed = match self {
            TransitionPolicy::Lenient => true,
            TransitionPolicy::Strict => matches!(
                (from, to),
                (OrderStatus::Pending, OrderStatus::Shipped)
                    | (OrderStatus::Pending, OrderStatus::Cancelled)
                    | (OrderStatus::Shipped, OrderStatus::Delivered)
                    | (OrderStatus::Shipped, OrderStatus::Cancelled)
            ),
        };

        if allowed {
            Ok(())
        } else {
            Err(MarketError::conflict(format!(
                "cannot move order from {} to {}",
                from, to
            )))
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(TransitionPolicy::Lenient),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(MarketError::validation(format!(
                "unknown transition policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Available => "available",
            ListingStatus::Sold => "sold",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ListingStatus::Available),
            "sold" => Ok(ListingStatus::Sold),
            other => Err(MarketError::Internal(anyhow::anyhow!(
                "unknown listing status in catalog: {}",
                other
            ))),
        }
    }
}

/// Stock/status pair of a listing. Both fields always change together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stock {
    pub listing_id: Uuid,
    pub quantity: i32,
    pub status: ListingStatus,
}

impl Stock {
    /// Take `quantity` units; the listing becomes sold when nothing is left.
    pub fn reserve(self, quantity: i32) -> MarketResult<Stock> {
        if self.status == ListingStatus::Sold {
            return Err(MarketError::conflict(format!(
                "listing {} is already sold",
                self.listing_id
            )));
        }
        if self.quantity < quantity {
            return Err(MarketError::conflict(format!(
                "insufficient stock for listing {}: {} available, {} requested",
                self.listing_id, self.quantity, quantity
            )));
        }

        let remaining = self.quantity - quantity;
        Ok(Stock {
            quantity: remaining,
            status: if remaining == 0 {
                ListingStatus::Sold
            } else {
                self.status
            },
            ..self
        })
    }

    /// Put back `quantity` units from a cancelled order.
    pub fn restore(self, quantity: i32) -> Stock {
        let quantity = self.quantity + quantity;
        Stock {
            quantity,
            status: if quantity > 0 {
                ListingStatus::Available
            } else {
                self.status
            },
            ..self
        }
    }

    /// Delivered orders consume the item outright.
    pub fn consume(self) -> Stock {
        Stock {
            status: ListingStatus::Sold,
            ..self
        }
    }
}

/// Decimal places kept by the NUMERIC(12, 2) money columns.
pub const MONEY_SCALE: i64 = 2;

/// Reject amounts the money columns would round or overflow, so a stored
/// total always equals the sum of its stored line items.
pub fn validate_money(amount: &BigDecimal, field: &str) -> MarketResult<()> {
    if amount.with_scale(MONEY_SCALE) != *amount {
        return Err(MarketError::validation(format!(
            "{} cannot have more than {} decimal places",
            field, MONEY_SCALE
        )));
    }
    if amount.abs() >= BigDecimal::from(10_000_000_000i64) {
        return Err(MarketError::validation(format!("{} is too large", field)));
    }
    Ok(())
}

pub fn order_total<'a, I>(items: I) -> BigDecimal
where
    I: IntoIterator<Item = (i32, &'a BigDecimal)>,
{
    items
        .into_iter()
        .fold(BigDecimal::zero(), |acc, (quantity, price)| {
            acc + price * BigDecimal::from(quantity)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(quantity: i32, status: ListingStatus) -> Stock {
        Stock {
            listing_id: Uuid::new_v4(),
            quantity,
            status,
        }
    }

    #[test]
    fn parses_known_statuses_only() {
        assert_eq!("Shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        let err = "Returned".parse::<OrderStatus>().unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn reserving_the_last_units_marks_sold() {
        let reserved = stock(2, ListingStatus::Available).reserve(2).unwrap();
        assert_eq!(reserved.quantity, 0);
        assert_eq!(reserved.status, ListingStatus::Sold);
    }

    #[test]
    fn partial_reservation_stays_available() {
        let reserved = stock(5, ListingStatus::Available).reserve(3).unwrap();
        assert_eq!(reserved.quantity, 2);
        assert_eq!(reserved.status, ListingStatus::Available);
    }

    #[test]
    fn over_reservation_is_a_conflict() {
        let err = stock(1, ListingStatus::Available).reserve(2).unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[test]
    fn sold_listing_cannot_be_reserved() {
        let err = stock(3, ListingStatus::Sold).reserve(1).unwrap_err();
        assert!(err.to_string().contains("already sold"));
    }

    #[test]
    fn restore_undoes_reserve() {
        let original = stock(2, ListingStatus::Available);
        let restored = original.reserve(2).unwrap().restore(2);
        assert_eq!(restored, original);
    }

    #[test]
    fn restoring_nothing_keeps_sold_listing_sold() {
        let restored = stock(0, ListingStatus::Sold).restore(0);
        assert_eq!(restored.status, ListingStatus::Sold);
    }

    #[test]
    fn consume_forces_sold_without_touching_quantity() {
        let consumed = stock(4, ListingStatus::Available).consume();
        assert_eq!(consumed.quantity, 4);
        assert_eq!(consumed.status, ListingStatus::Sold);
    }

    #[test]
    fn total_sums_quantity_times_price() {
        let a: BigDecimal = "19.99".parse().unwrap();
        let b: BigDecimal = "5.00".parse().unwrap();
        let total = order_total([(2, &a), (3, &b)]);
        assert_eq!(total, "54.98".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn lenient_policy_allows_skipping_shipped() {
        let policy = TransitionPolicy::Lenient;
        assert!(policy.check(OrderStatus::Pending, OrderStatus::Delivered).is_ok());
        assert!(policy.check(OrderStatus::Shipped, OrderStatus::Pending).is_ok());
    }

    #[test]
    fn strict_policy_follows_documented_edges() {
        let policy = TransitionPolicy::Strict;
        assert!(policy.check(OrderStatus::Pending, OrderStatus::Shipped).is_ok());
        assert!(policy.check(OrderStatus::Shipped, OrderStatus::Delivered).is_ok());
        assert!(policy.check(OrderStatus::Shipped, OrderStatus::Cancelled).is_ok());
        assert!(policy.check(OrderStatus::Pending, OrderStatus::Delivered).is_err());
    }

    #[test]
    fn terminal_statuses_are_final_under_every_policy() {
        for policy in [TransitionPolicy::Lenient, TransitionPolicy::Strict] {
            for to in OrderStatus::ALL {
                assert!(policy.check(OrderStatus::Cancelled, to).is_err());
                assert!(policy.check(OrderStatus::Delivered, to).is_err());
            }
        }
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<TransitionPolicy>().unwrap(), TransitionPolicy::Strict);
        assert!("loose".parse::<TransitionPolicy>().is_err());
    }

    #[test]
    fn money_keeps_whole_cents() {
        let cents: BigDecimal = "19.99".parse().unwrap();
        let padded: BigDecimal = "19.9900".parse().unwrap();
        let sub_cent: BigDecimal = "0.005".parse().unwrap();
        assert!(validate_money(&cents, "price").is_ok());
        assert!(validate_money(&padded, "price").is_ok());
        assert!(validate_money(&BigDecimal::from(120), "price").is_ok());
        assert!(matches!(
            validate_money(&sub_cent, "price"),
            Err(MarketError::Validation(_))
        ));
        assert!(validate_money(&BigDecimal::from(10_000_000_000i64), "price").is_err());
    }
}
