use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use shared::extract::{Json, Path, Query};
use shared::{Caller, DbPool, MarketError, TransitionPolicy};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::lifecycle::{OrderFilter, OrderLifecycle, OrderPatch, SalesSummary, DEFAULT_SUMMARY_DAYS};
use crate::models::OrderView;
use crate::payments::{PaymentEvent, PaymentRecorder};
use crate::reservation::{CreatedOrder, InventoryReservation, LineItemRequest, ReservationRequest};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub policy: TransitionPolicy,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub buyer_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<LineItemBody>,
}

#[derive(Debug, Deserialize)]
pub struct LineItemBody {
    pub listing_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub price: Option<BigDecimal>,
}

impl TryFrom<CreateOrderRequest> for ReservationRequest {
    type Error = MarketError;

    fn try_from(request: CreateOrderRequest) -> Result<Self, Self::Error> {
        match (request.buyer_id, request.seller_id) {
            (Some(buyer_id), Some(seller_id)) if !request.items.is_empty() => Ok(Self {
                buyer_id,
                seller_id,
                items: request
                    .items
                    .into_iter()
                    .map(|item| LineItemRequest {
                        listing_id: item.listing_id,
                        quantity: item.quantity,
                        unit_price: item.price,
                    })
                    .collect(),
            }),
            _ => Err(MarketError::validation(
                "buyer_id, seller_id and items are required",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub buyer_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub seller_id: Option<Uuid>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/summary", get(sales_summary))
        .route(
            "/orders/:id",
            get(get_order).patch(update_order).delete(cancel_order),
        )
        .route("/orders/:id/status", put(set_status))
        .route("/payments/webhook", post(payment_webhook))
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

pub async fn create_order(
    State(state): State<AppState>,
    _caller: Caller,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreatedOrder>), MarketError> {
    let request = ReservationRequest::try_from(request)?;
    let created = InventoryReservation::new(state.pool)
        .create_order(request)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderView>>, MarketError> {
    let filter = OrderFilter {
        buyer_id: query.buyer_id,
        seller_id: query.seller_id,
        limit: query.limit.unwrap_or(50),
    };
    let orders = OrderLifecycle::new(state.pool, state.policy)
        .list_orders(caller.id(), filter)
        .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, MarketError> {
    let order = OrderLifecycle::new(state.pool, state.policy)
        .get_order(order_id, caller.id())
        .await?;
    Ok(Json(order))
}

pub async fn update_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(patch): Json<OrderPatch>,
) -> Result<Json<OrderView>, MarketError> {
    let order = OrderLifecycle::new(state.pool, state.policy)
        .update_order(order_id, caller.id(), patch)
        .await?;
    Ok(Json(order))
}

pub async fn set_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<OrderView>, MarketError> {
    let status = request
        .status
        .ok_or_else(|| MarketError::validation("status is required"))?;
    let order = OrderLifecycle::new(state.pool, state.policy)
        .set_status(order_id, &status, caller.id())
        .await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, MarketError> {
    let order = OrderLifecycle::new(state.pool, state.policy)
        .cancel(order_id, caller.id())
        .await?;
    Ok(Json(order))
}

/// Always acknowledges, so the provider does not redeliver events that can
/// never be applied, including bodies that are not JSON at all. Failures
/// are logged.
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> Json<WebhookAck> {
    match serde_json::from_slice::<PaymentEvent>(&body) {
        Ok(event) => {
            if let Err(e) = PaymentRecorder::new(state.pool).record_payment(event).await {
                warn!("Failed to record payment event: {}", e);
            }
        }
        Err(e) => warn!("Unreadable payment event: {}", e),
    }
    Json(WebhookAck { received: true })
}

pub async fn sales_summary(
    State(state): State<AppState>,
    _caller: Caller,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SalesSummary>, MarketError> {
    let seller_id = query
        .seller_id
        .ok_or_else(|| MarketError::validation("seller_id is required"))?;
    let summary = OrderLifecycle::new(state.pool, state.policy)
        .sales_summary(seller_id, query.days.unwrap_or(DEFAULT_SUMMARY_DAYS))
        .await?;
    Ok(Json(summary))
}

pub async fn health_check() -> &'static str {
    "OK"
}
