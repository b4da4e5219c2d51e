use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::info;
use uuid::Uuid;

use shared::{EngineError, OrderStatus, PaymentStatus};

use crate::models::{NewOrderStatusHistory, Order, OrderItem};
use crate::schema::{order_items, order_status_history, orders};
use crate::DbPool;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(AsChangeset)]
#[diesel(table_name = orders)]
struct StatusChangeset {
    status: String,
    payment_status: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

/// Governs every post-creation order status change.
///
/// The order row is locked `FOR UPDATE` for the whole read-validate-write
/// sequence, so two concurrent transition attempts serialize instead of both
/// reading the same stale status.
#[derive(Clone)]
pub struct OrderLifecycle {
    pool: DbPool,
    lock_timeout: Duration,
}

impl OrderLifecycle {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Transition an order to `new_status`.
    ///
    /// When `admin_id` is present the change is also recorded in
    /// `order_status_history`; the status update and the history row commit
    /// together or not at all.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        admin_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let lock_stmt = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );

        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        let old_status = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    diesel::sql_query(lock_stmt).execute(conn).await?;

                    let order: Option<Order> = orders::table
                        .find(order_id)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let order = order.ok_or(EngineError::OrderNotFound(order_id))?;
                    let current = order.parsed_status().ok_or_else(|| {
                        EngineError::CorruptOrderRow {
                            order_id,
                            value: order.status.clone(),
                        }
                    })?;

                    if !current.can_transition_to(new_status) {
                        return Err(EngineError::InvalidTransition {
                            from: current,
                            to: new_status,
                        });
                    }

                    diesel::update(orders::table.find(order_id))
                        .set(&StatusChangeset {
                            status: new_status.as_str().to_string(),
                            payment_status: payment_status_for(new_status)
                                .map(|s| s.as_str().to_string()),
                            updated_at: Some(Utc::now()),
                        })
                        .execute(conn)
                        .await?;

                    if let Some(changed_by) = admin_id {
                        diesel::insert_into(order_status_history::table)
                            .values(&NewOrderStatusHistory {
                                id: Uuid::new_v4(),
                                order_id,
                                old_status: current.as_str().to_string(),
                                new_status: new_status.as_str().to_string(),
                                changed_by: Some(changed_by),
                                notes,
                            })
                            .execute(conn)
                            .await?;
                    }

                    Ok(current)
                })
            })
            .await?;

        info!(
            order_id = %order_id,
            from = %old_status,
            to = %new_status,
            "order status updated"
        );
        Ok(())
    }

    /// Fetch an order together with its immutable item snapshot.
    pub async fn get_order(&self, order_id: Uuid) -> Result<(Order, Vec<OrderItem>), EngineError> {
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;

        let order: Option<Order> = orders::table
            .find(order_id)
            .first(&mut conn)
            .await
            .optional()?;
        let order = order.ok_or(EngineError::OrderNotFound(order_id))?;

        let items = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::product_id.asc())
            .load::<OrderItem>(&mut conn)
            .await?;

        Ok((order, items))
    }
}

/// Payment state mirrors the two transitions that are, by definition, payment
/// events; every other transition leaves it untouched.
fn payment_status_for(status: OrderStatus) -> Option<PaymentStatus> {
    match status {
        OrderStatus::Paid => Some(PaymentStatus::Paid),
        OrderStatus::Refunded => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_tracks_paid_and_refunded_only() {
        assert_eq!(
            payment_status_for(OrderStatus::Paid),
            Some(PaymentStatus::Paid)
        );
        assert_eq!(
            payment_status_for(OrderStatus::Refunded),
            Some(PaymentStatus::Refunded)
        );
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(payment_status_for(status), None);
        }
    }
}
