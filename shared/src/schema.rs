diesel::table! {
    listings (id) {
        id -> Uuid,
        seller_id -> Uuid,
        title -> Varchar,
        price -> Numeric,
        quantity -> Int4,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    offers (id) {
        id -> Uuid,
        listing_id -> Uuid,
        buyer_id -> Uuid,
        seller_id -> Uuid,
        offer_amount -> Numeric,
        original_price -> Numeric,
        message -> Nullable<Varchar>,
        status -> Varchar,
        counter_amount -> Nullable<Numeric>,
        counter_message -> Nullable<Varchar>,
        counter_created_at -> Nullable<Timestamptz>,
        responded_at -> Nullable<Timestamptz>,
        expires_at -> Timestamptz,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        listing_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
    }
}

diesel::table! {
    order_timeline (id) {
        id -> Int8,
        order_id -> Uuid,
        status -> Varchar,
        actor_id -> Nullable<Uuid>,
        at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        buyer_id -> Uuid,
        seller_id -> Uuid,
        total_price -> Numeric,
        status -> Varchar,
        paid -> Bool,
        refunded -> Bool,
        payment_provider -> Nullable<Varchar>,
        payment_provider_id -> Nullable<Varchar>,
        payment_status -> Nullable<Varchar>,
        order_date -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processed_payments (provider_id) {
        provider_id -> Varchar,
        order_id -> Uuid,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        display_name -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(listings -> users (seller_id));
diesel::joinable!(offers -> listings (listing_id));
diesel::joinable!(order_items -> listings (listing_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_timeline -> orders (order_id));
diesel::joinable!(processed_payments -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    listings,
    offers,
    order_items,
    order_timeline,
    orders,
    outbox_events,
    processed_payments,
    users,
);
