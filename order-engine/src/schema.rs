diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        stock -> Int4,
        is_active -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        status -> Varchar,
        total_amount -> Numeric,
        shipping_address -> Text,
        payment_method -> Varchar,
        payment_status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    order_items (order_id, product_id) {
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        price -> Numeric,
    }
}

diesel::table! {
    order_status_history (id) {
        id -> Uuid,
        order_id -> Uuid,
        old_status -> Varchar,
        new_status -> Varchar,
        changed_by -> Nullable<Uuid>,
        notes -> Nullable<Text>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inventory_reservations (id) {
        id -> Uuid,
        product_id -> Uuid,
        user_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        expires_at -> Timestamptz,
        order_id -> Nullable<Uuid>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inventory_movements (id) {
        id -> Uuid,
        product_id -> Uuid,
        movement_type -> Varchar,
        quantity -> Int4,
        reference_type -> Nullable<Varchar>,
        reference_id -> Nullable<Uuid>,
        reason -> Nullable<Text>,
        user_id -> Nullable<Uuid>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    products,
    orders,
    order_items,
    order_status_history,
    inventory_reservations,
    inventory_movements,
);
