use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use shared::extract::{Json, Path, Query};
use shared::{Caller, DbPool, MarketError, OfferStats};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::OfferView;
use crate::negotiation::{NewOfferRequest, OfferEngine, OfferScope};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub ttl_days: i64,
}

impl AppState {
    fn engine(&self) -> OfferEngine {
        OfferEngine::new(self.pool.clone(), self.ttl_days)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferBody {
    pub listing_id: Option<Uuid>,
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TryFrom<CreateOfferBody> for NewOfferRequest {
    type Error = MarketError;

    fn try_from(body: CreateOfferBody) -> Result<Self, Self::Error> {
        match (body.listing_id, body.amount) {
            (Some(listing_id), Some(amount)) => Ok(Self {
                listing_id,
                amount,
                message: body.message,
            }),
            _ => Err(MarketError::validation("listing_id and amount are required")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CounterBody {
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOffersQuery {
    pub listing_id: Option<Uuid>,
    pub role: Option<String>,
    pub limit: Option<i64>,
}

impl ListOffersQuery {
    fn scope(&self) -> Result<OfferScope, MarketError> {
        match (self.listing_id, self.role.as_deref()) {
            (Some(listing_id), None) => Ok(OfferScope::Listing(listing_id)),
            (None, Some("sent")) => Ok(OfferScope::Sent),
            (None, Some("received")) => Ok(OfferScope::Received),
            (None, Some(other)) => Err(MarketError::validation(format!(
                "role must be sent or received, got {}",
                other
            ))),
            _ => Err(MarketError::validation(
                "pass either listing_id or role=sent|received",
            )),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/offers", post(create_offer).get(list_offers))
        .route("/offers/stats", get(offer_stats))
        .route("/offers/:id", get(get_offer))
        .route("/offers/:id/accept", post(accept_offer))
        .route("/offers/:id/reject", post(reject_offer))
        .route("/offers/:id/counter", post(counter_offer))
        .route("/offers/:id/accept-counter", post(accept_counter_offer))
        .route("/offers/:id/withdraw", post(withdraw_offer))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_offer(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateOfferBody>,
) -> Result<(StatusCode, Json<OfferView>), MarketError> {
    let request = NewOfferRequest::try_from(body)?;
    let offer = state.engine().create_offer(caller.id(), request).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn list_offers(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListOffersQuery>,
) -> Result<Json<Vec<OfferView>>, MarketError> {
    let scope = query.scope()?;
    let offers = state
        .engine()
        .list_offers(caller.id(), scope, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(offers))
}

pub async fn offer_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<OfferStats>, MarketError> {
    let stats = state.engine().offer_stats(caller.id()).await?;
    Ok(Json(stats))
}

pub async fn get_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<OfferView>, MarketError> {
    let offer = state.engine().get_offer(offer_id, caller.id()).await?;
    Ok(Json(offer))
}

pub async fn accept_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<OfferView>, MarketError> {
    let offer = state.engine().accept_offer(offer_id, caller.id()).await?;
    Ok(Json(offer))
}

pub async fn reject_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
    body: Option<Json<MessageBody>>,
) -> Result<Json<OfferView>, MarketError> {
    let Json(body) = body.unwrap_or_default();
    let offer = state
        .engine()
        .reject_offer(offer_id, caller.id(), body.message)
        .await?;
    Ok(Json(offer))
}

pub async fn counter_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
    Json(body): Json<CounterBody>,
) -> Result<Json<OfferView>, MarketError> {
    let amount = body
        .amount
        .ok_or_else(|| MarketError::validation("amount is required"))?;
    let offer = state
        .engine()
        .counter_offer(offer_id, caller.id(), amount, body.message)
        .await?;
    Ok(Json(offer))
}

pub async fn accept_counter_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<OfferView>, MarketError> {
    let offer = state
        .engine()
        .accept_counter_offer(offer_id, caller.id())
        .await?;
    Ok(Json(offer))
}

pub async fn withdraw_offer(
    State(state): State<AppState>,
    caller: Caller,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<OfferView>, MarketError> {
    let offer = state.engine().withdraw_offer(offer_id, caller.id()).await?;
    Ok(Json(offer))
}

pub async fn health_check() -> &'static str {
    "OK"
}
