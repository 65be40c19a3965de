//! Reads and in-place stock writes against the listing catalog.
//!
//! The catalog (listings and users) belongs to another part of the
//! marketplace. Orders and offers only look records up, and orders adjust
//! a listing's stock/status pair under a row lock.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::order::Stock;
use crate::schema::{listings, users};

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::listings)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn stock(&self) -> MarketResult<Stock> {
        Ok(Stock {
            listing_id: self.id,
            quantity: self.quantity,
            status: self.status.parse()?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::listings)]
pub struct NewListing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

pub async fn find_user(conn: &mut AsyncPgConnection, id: Uuid) -> MarketResult<Option<User>> {
    let user = users::table
        .filter(users::id.eq(id))
        .first::<User>(conn)
        .await
        .optional()?;
    Ok(user)
}

/// Look a user up, failing with NotFound under the given role name.
pub async fn require_user(conn: &mut AsyncPgConnection, id: Uuid, role: &str) -> MarketResult<User> {
    find_user(conn, id)
        .await?
        .ok_or_else(|| MarketError::not_found(format!("{} {} not found", role, id)))
}

pub async fn find_listing(conn: &mut AsyncPgConnection, id: Uuid) -> MarketResult<Option<Listing>> {
    let listing = listings::table
        .filter(listings::id.eq(id))
        .first::<Listing>(conn)
        .await
        .optional()?;
    Ok(listing)
}

pub async fn require_listing(conn: &mut AsyncPgConnection, id: Uuid) -> MarketResult<Listing> {
    find_listing(conn, id)
        .await?
        .ok_or_else(|| MarketError::not_found(format!("listing {} not found", id)))
}

/// Fetch a listing with `FOR UPDATE`, holding the row until the enclosing
/// transaction ends.
pub async fn lock_listing(conn: &mut AsyncPgConnection, id: Uuid) -> MarketResult<Listing> {
    listings::table
        .filter(listings::id.eq(id))
        .for_update()
        .first::<Listing>(conn)
        .await
        .optional()?
        .ok_or_else(|| MarketError::not_found(format!("listing {} not found", id)))
}

pub async fn save_stock(conn: &mut AsyncPgConnection, stock: &Stock) -> MarketResult<()> {
    diesel::update(listings::table.filter(listings::id.eq(stock.listing_id)))
        .set((
            listings::quantity.eq(stock.quantity),
            listings::status.eq(stock.status.as_str()),
            listings::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
