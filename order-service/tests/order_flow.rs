//! Order workflows against a real Postgres. Set `TEST_DATABASE_URL` to run
//! them; without it every test returns early.

use std::sync::Once;

use bigdecimal::BigDecimal;
use diesel_async::RunQueryDsl;
use order_service::lifecycle::OrderLifecycle;
use order_service::payments::{
    PaymentEvent, PaymentEventData, PaymentIntent, PaymentMetadata, PaymentOutcome,
    PaymentRecorder, PAYMENT_SUCCEEDED,
};
use order_service::reservation::{InventoryReservation, LineItemRequest, ReservationRequest};
use shared::catalog::{self, Listing, NewListing, User};
use shared::schema::{listings, users};
use shared::{db, DbPool, ListingStatus, MarketError, TransitionPolicy};
use uuid::Uuid;

static MIGRATE: Once = Once::new();

async fn test_pool() -> Option<DbPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    MIGRATE.call_once(|| db::run_migrations(&url).expect("migrations should apply"));
    Some(db::connect(&url, 16).await.expect("test database should accept connections"))
}

async fn seed_user(pool: &DbPool) -> Uuid {
    let mut conn = pool.get().await.unwrap();
    let user = User {
        id: Uuid::new_v4(),
        display_name: "test user".to_string(),
        created_at: None,
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .await
        .unwrap();
    user.id
}

async fn seed_listing(pool: &DbPool, seller_id: Uuid, price: i32, quantity: i32) -> Uuid {
    let mut conn = pool.get().await.unwrap();
    let listing = NewListing {
        id: Uuid::new_v4(),
        seller_id,
        title: "vintage lamp".to_string(),
        price: BigDecimal::from(price),
        quantity,
        status: ListingStatus::Available.as_str().to_string(),
    };
    diesel::insert_into(listings::table)
        .values(&listing)
        .execute(&mut conn)
        .await
        .unwrap();
    listing.id
}

async fn listing(pool: &DbPool, id: Uuid) -> Listing {
    let mut conn = pool.get().await.unwrap();
    catalog::require_listing(&mut conn, id).await.unwrap()
}

fn cart(buyer_id: Uuid, seller_id: Uuid, items: &[(Uuid, i32)]) -> ReservationRequest {
    ReservationRequest {
        buyer_id,
        seller_id,
        items: items
            .iter()
            .map(|(listing_id, quantity)| LineItemRequest {
                listing_id: *listing_id,
                quantity: *quantity,
                unit_price: None,
            })
            .collect(),
    }
}

fn succeeded_payment(order_id: Uuid, intent_id: &str) -> PaymentEvent {
    PaymentEvent {
        event_type: PAYMENT_SUCCEEDED.to_string(),
        provider: None,
        data: PaymentEventData {
            object: PaymentIntent {
                id: intent_id.to_string(),
                metadata: PaymentMetadata {
                    order_id: Some(order_id),
                },
            },
        },
    }
}

#[tokio::test]
async fn last_units_sell_out_the_listing() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 40, 2).await;
    let reservation = InventoryReservation::new(pool.clone());

    let created = reservation
        .create_order(cart(buyer, seller, &[(lamp, 2)]))
        .await
        .unwrap();
    assert_eq!(created.order.status, "Pending");
    assert_eq!(created.order.total_price, BigDecimal::from(80));
    assert_eq!(created.order.timeline.len(), 1);

    let after = listing(&pool, lamp).await;
    assert_eq!(after.quantity, 0);
    assert_eq!(after.status, "sold");

    let err = reservation
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
}

#[tokio::test]
async fn failing_line_item_rolls_back_earlier_reservations() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let plenty = seed_listing(&pool, seller, 10, 5).await;
    let scarce = seed_listing(&pool, seller, 10, 1).await;

    let err = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(plenty, 2), (scarce, 3)]))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    assert_eq!(listing(&pool, plenty).await.quantity, 5);
    assert_eq!(listing(&pool, scarce).await.quantity, 1);

    let orders = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient)
        .list_orders(buyer, order_service::lifecycle::OrderFilter {
            buyer_id: Some(buyer),
            seller_id: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn unknown_listing_is_not_found() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;

    let err = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(Uuid::new_v4(), 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 15, 3).await;

    let attempts = (0..8).map(|_| {
        let reservation = InventoryReservation::new(pool.clone());
        async move { reservation.create_order(cart(buyer, seller, &[(lamp, 1)])).await }
    });
    let results = futures::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 3);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(failure, MarketError::Conflict(_)));
    }

    let after = listing(&pool, lamp).await;
    assert_eq!(after.quantity, 0);
    assert_eq!(after.status, "sold");
}

#[tokio::test]
async fn cancelling_restores_exactly_what_was_reserved() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 25, 5).await;

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 2)]))
        .await
        .unwrap();
    assert_eq!(listing(&pool, lamp).await.quantity, 3);

    let cancelled = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient)
        .cancel(created.order.id, buyer)
        .await
        .unwrap();
    assert_eq!(cancelled.status, "Cancelled");
    let statuses: Vec<&str> = cancelled.timeline.iter().map(|t| t.status.as_str()).collect();
    assert_eq!(statuses, ["Pending", "Cancelled"]);
    assert_eq!(cancelled.timeline[1].by, Some(buyer));

    let after = listing(&pool, lamp).await;
    assert_eq!(after.quantity, 5);
    assert_eq!(after.status, "available");
}

#[tokio::test]
async fn cancelling_a_sold_out_order_reopens_the_listing() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 25, 1).await;

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();
    assert_eq!(listing(&pool, lamp).await.status, "sold");

    OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient)
        .set_status(created.order.id, "Cancelled", seller)
        .await
        .unwrap();

    let after = listing(&pool, lamp).await;
    assert_eq!(after.quantity, 1);
    assert_eq!(after.status, "available");
}

#[tokio::test]
async fn terminal_orders_reject_further_transitions() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 25, 4).await;
    let lifecycle = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient);

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();
    lifecycle.cancel(created.order.id, buyer).await.unwrap();

    let err = lifecycle.cancel(created.order.id, buyer).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
    let err = lifecycle
        .set_status(created.order.id, "Shipped", seller)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    // A second cancel must not restore stock twice.
    assert_eq!(listing(&pool, lamp).await.quantity, 4);
    let order = lifecycle.get_order(created.order.id, buyer).await.unwrap();
    assert_eq!(order.timeline.len(), 2);
}

#[tokio::test]
async fn only_the_seller_ships() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 25, 4).await;
    let lifecycle = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient);

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();

    let err = lifecycle
        .set_status(created.order.id, "Shipped", buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let shipped = lifecycle
        .set_status(created.order.id, "Shipped", seller)
        .await
        .unwrap();
    assert_eq!(shipped.status, "Shipped");

    let err = lifecycle.cancel(created.order.id, buyer).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
}

#[tokio::test]
async fn delivery_marks_the_listing_sold() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 25, 5).await;
    let lifecycle = OrderLifecycle::new(pool.clone(), TransitionPolicy::Strict);

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 2)]))
        .await
        .unwrap();

    let err = lifecycle
        .set_status(created.order.id, "Delivered", seller)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    lifecycle
        .set_status(created.order.id, "Shipped", seller)
        .await
        .unwrap();
    let delivered = lifecycle
        .set_status(created.order.id, "Delivered", seller)
        .await
        .unwrap();
    assert_eq!(delivered.timeline.len(), 3);

    let after = listing(&pool, lamp).await;
    assert_eq!(after.quantity, 3);
    assert_eq!(after.status, "sold");
}

#[tokio::test]
async fn replayed_payment_is_recorded_once() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 30, 3).await;

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();
    let intent = format!("pi_{}", Uuid::new_v4().simple());
    let recorder = PaymentRecorder::new(pool.clone());

    let first = recorder
        .record_payment(succeeded_payment(created.order.id, &intent))
        .await
        .unwrap();
    let replay = recorder
        .record_payment(succeeded_payment(created.order.id, &intent))
        .await
        .unwrap();
    assert_eq!(first, PaymentOutcome::Recorded);
    assert_eq!(replay, PaymentOutcome::Duplicate);

    let order = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient)
        .get_order(created.order.id, seller)
        .await
        .unwrap();
    assert!(order.paid);
    assert_eq!(order.payment_info.provider_id.as_deref(), Some(intent.as_str()));
    let paid_rows = order.timeline.iter().filter(|t| t.status == "Paid").count();
    assert_eq!(paid_rows, 1);
    assert_eq!(order.status, "Pending");
}

#[tokio::test]
async fn payment_for_unknown_order_is_dropped() {
    let Some(pool) = test_pool().await else { return };
    let outcome = PaymentRecorder::new(pool)
        .record_payment(succeeded_payment(Uuid::new_v4(), "pi_orphan"))
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::OrderMissing);
}

#[tokio::test]
async fn sales_summary_counts_completed_orders_only() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 20, 10).await;
    let reservation = InventoryReservation::new(pool.clone());
    let lifecycle = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient);

    let shipped = reservation
        .create_order(cart(buyer, seller, &[(lamp, 3)]))
        .await
        .unwrap();
    lifecycle
        .set_status(shipped.order.id, "Shipped", seller)
        .await
        .unwrap();
    reservation
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();

    let summary = lifecycle.sales_summary(seller, 30).await.unwrap();
    assert_eq!(summary.orders, 1);
    assert_eq!(summary.units_sold, 3);
    assert_eq!(summary.revenue, BigDecimal::from(60));
}

#[tokio::test]
async fn agreed_price_overrides_the_listing_price() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 100, 1).await;

    let created = InventoryReservation::new(pool.clone())
        .create_order(ReservationRequest {
            buyer_id: buyer,
            seller_id: seller,
            items: vec![LineItemRequest {
                listing_id: lamp,
                quantity: 1,
                unit_price: Some(BigDecimal::from(80)),
            }],
        })
        .await
        .unwrap();
    assert_eq!(created.order.total_price, BigDecimal::from(80));
    assert_eq!(created.payment.amount, BigDecimal::from(80));
}

#[tokio::test]
async fn strangers_cannot_read_or_update_an_order() {
    let Some(pool) = test_pool().await else { return };
    let seller = seed_user(&pool).await;
    let buyer = seed_user(&pool).await;
    let stranger = seed_user(&pool).await;
    let lamp = seed_listing(&pool, seller, 20, 2).await;
    let lifecycle = OrderLifecycle::new(pool.clone(), TransitionPolicy::Lenient);

    let created = InventoryReservation::new(pool.clone())
        .create_order(cart(buyer, seller, &[(lamp, 1)]))
        .await
        .unwrap();
    let order_id = created.order.id;

    let err = lifecycle.get_order(order_id, stranger).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
    let patch = order_service::lifecycle::OrderPatch {
        refunded: Some(true),
        ..Default::default()
    };
    let err = lifecycle
        .update_order(order_id, stranger, patch.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let filter = order_service::lifecycle::OrderFilter {
        buyer_id: Some(buyer),
        seller_id: None,
        limit: 10,
    };
    let seen = lifecycle.list_orders(stranger, filter.clone()).await.unwrap();
    assert!(seen.is_empty());
    let seen = lifecycle.list_orders(seller, filter).await.unwrap();
    assert_eq!(seen.len(), 1);

    let updated = lifecycle.update_order(order_id, seller, patch).await.unwrap();
    assert!(updated.refunded);
    assert!(lifecycle.get_order(order_id, buyer).await.unwrap().refunded);
}
