use std::collections::BTreeMap;
use std::time::Duration;

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use num_traits::Zero;
use tracing::info;
use uuid::Uuid;

use shared::{EngineError, OrderStatus, PaymentStatus};

use crate::models::{NewOrder, OrderItem, Product};
use crate::schema::{order_items, orders, products};
use crate::DbPool;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One requested line of a checkout. Lines referencing the same product are
/// merged before any locking happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub items: Vec<OrderLine>,
    pub shipping_address: String,
    pub payment_method: String,
}

/// The checkout path. Validates, prices, and commits an order against live
/// stock in a single transaction; reservations are never consulted here.
#[derive(Clone)]
pub struct CheckoutCoordinator {
    pool: DbPool,
    lock_timeout: Duration,
}

impl CheckoutCoordinator {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Create an order atomically against live stock.
    ///
    /// Product rows are locked `FOR UPDATE` in ascending id order, so two
    /// multi-item checkouts sharing products cannot deadlock. Prices and the
    /// order total come from the rows read under the lock, never from the
    /// caller. On any failure nothing survives: no order, no items, no stock
    /// change.
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<Uuid, EngineError> {
        let lines = merge_lines(&request.items)?;
        if request.shipping_address.trim().is_empty() {
            return Err(EngineError::Validation(
                "shipping address must not be empty".into(),
            ));
        }
        if request.payment_method.trim().is_empty() {
            return Err(EngineError::Validation(
                "payment method must not be empty".into(),
            ));
        }

        let order_id = Uuid::new_v4();
        let user_id = request.user_id;
        let shipping_address = request.shipping_address;
        let payment_method = request.payment_method;
        let lock_stmt = lock_timeout_stmt(self.lock_timeout);

        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                diesel::sql_query(lock_stmt).execute(conn).await?;

                // Lock phase: ascending product id, all-or-nothing.
                let mut priced: Vec<(OrderLine, BigDecimal)> = Vec::with_capacity(lines.len());
                for line in &lines {
                    let product: Option<Product> = products::table
                        .filter(products::id.eq(line.product_id))
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let product =
                        product.ok_or(EngineError::ProductNotFound(line.product_id))?;
                    if !product.is_active {
                        return Err(EngineError::ProductInactive {
                            product_id: product.id,
                            name: product.name,
                        });
                    }
                    if product.stock < line.quantity {
                        return Err(EngineError::InsufficientStock {
                            product_id: product.id,
                            name: product.name,
                            requested: line.quantity,
                            available: product.stock,
                        });
                    }
                    priced.push((line.clone(), product.price));
                }

                let total = order_total(&priced);

                diesel::insert_into(orders::table)
                    .values(&NewOrder {
                        id: order_id,
                        user_id,
                        status: OrderStatus::Pending.as_str().to_string(),
                        total_amount: total,
                        shipping_address,
                        payment_method,
                        payment_status: PaymentStatus::Pending.as_str().to_string(),
                    })
                    .execute(conn)
                    .await?;

                for (line, price) in priced {
                    diesel::insert_into(order_items::table)
                        .values(&OrderItem {
                            order_id,
                            product_id: line.product_id,
                            quantity: line.quantity,
                            price,
                        })
                        .execute(conn)
                        .await?;

                    // Guarded decrement. The row lock above should make this
                    // unconditional; the stock >= quantity filter is the
                    // contract's fallback when the store weakens that lock.
                    let updated = diesel::update(
                        products::table
                            .filter(products::id.eq(line.product_id))
                            .filter(products::stock.ge(line.quantity)),
                    )
                    .set((
                        products::stock.eq(products::stock - line.quantity),
                        products::updated_at.eq(Some(chrono::Utc::now())),
                    ))
                    .execute(conn)
                    .await?;
                    if updated == 0 {
                        return Err(EngineError::StockDepleted(line.product_id));
                    }
                }

                Ok(order_id)
            })
        })
        .await
        .map(|id| {
            info!(order_id = %id, user_id = %user_id, "order committed");
            id
        })
    }
}

/// Validate and normalize the requested lines: positive quantities, duplicate
/// products merged, result sorted by product id so locks are acquired in one
/// total order.
fn merge_lines(items: &[OrderLine]) -> Result<Vec<OrderLine>, EngineError> {
    if items.is_empty() {
        return Err(EngineError::Validation(
            "order must contain at least one item".into(),
        ));
    }

    let mut merged: BTreeMap<Uuid, i64> = BTreeMap::new();
    for item in items {
        if item.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
        *merged.entry(item.product_id).or_insert(0) += i64::from(item.quantity);
    }

    merged
        .into_iter()
        .map(|(product_id, quantity)| {
            i32::try_from(quantity)
                .map(|quantity| OrderLine {
                    product_id,
                    quantity,
                })
                .map_err(|_| {
                    EngineError::Validation(format!(
                        "combined quantity for product {product_id} is out of range"
                    ))
                })
        })
        .collect()
}

fn order_total(priced: &[(OrderLine, BigDecimal)]) -> BigDecimal {
    let mut total = BigDecimal::zero();
    for (line, price) in priced {
        total += price * BigDecimal::from(line.quantity);
    }
    total
}

fn lock_timeout_stmt(timeout: Duration) -> String {
    format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis())
}
