use chrono::{DateTime, Duration, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::RunQueryDsl;
use tracing::{debug, info};
use uuid::Uuid;

use shared::{EngineError, ReservationStatus};

use crate::models::{NewReservation, Reservation};
use crate::schema::{inventory_reservations, products};
use crate::DbPool;

pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Time-boxed soft holds on stock.
///
/// Reservations are advisory: they narrow the *derived* available-stock read
/// but never mutate `products.stock`, and checkout ignores them entirely.
/// Combined holds may therefore exceed stock by design.
#[derive(Clone)]
pub struct ReservationManager {
    pool: DbPool,
}

impl ReservationManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Place a hold for `quantity` units, expiring after `ttl_minutes`
    /// (default 30). No availability check happens here; the hard check is
    /// checkout's alone.
    pub async fn create_reservation(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        quantity: i32,
        ttl_minutes: Option<i64>,
    ) -> Result<Uuid, EngineError> {
        if quantity <= 0 {
            return Err(EngineError::Validation(
                "reservation quantity must be positive".into(),
            ));
        }
        let ttl = ttl_minutes.unwrap_or(DEFAULT_TTL_MINUTES);
        if ttl <= 0 {
            return Err(EngineError::Validation(
                "reservation ttl must be positive".into(),
            ));
        }

        let reservation_id = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::minutes(ttl);

        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        diesel::insert_into(inventory_reservations::table)
            .values(&NewReservation {
                id: reservation_id,
                product_id,
                user_id,
                quantity,
                status: ReservationStatus::Active.as_str().to_string(),
                expires_at,
                order_id: None,
            })
            .execute(&mut conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::ForeignKeyViolation,
                    _,
                ) => EngineError::ProductNotFound(product_id),
                other => other.into(),
            })?;

        debug!(
            reservation_id = %reservation_id,
            product_id = %product_id,
            quantity,
            "reservation placed"
        );
        Ok(reservation_id)
    }

    /// Stock as shoppers should see it: the authoritative counter minus all
    /// active, unexpired holds. Recomputed from current rows on every call.
    pub async fn available_stock(&self, product_id: Uuid) -> Result<i32, EngineError> {
        self.available_stock_at(product_id, Utc::now()).await
    }

    pub async fn available_stock_at(
        &self,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i32, EngineError> {
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;

        let stock: Option<i32> = products::table
            .find(product_id)
            .select(products::stock)
            .first(&mut conn)
            .await
            .optional()?;
        let stock = stock.ok_or(EngineError::ProductNotFound(product_id))?;

        let reserved: Option<i64> = inventory_reservations::table
            .filter(inventory_reservations::product_id.eq(product_id))
            .filter(inventory_reservations::status.eq(ReservationStatus::Active.as_str()))
            .filter(inventory_reservations::expires_at.gt(now))
            .select(sum(inventory_reservations::quantity))
            .first(&mut conn)
            .await?;

        let reserved = i32::try_from(reserved.unwrap_or(0)).unwrap_or(i32::MAX);
        Ok(stock - reserved)
    }

    /// Mark a reservation as converted into `order_id`. Conditional on the
    /// row still being active, so a hold can never be counted twice.
    pub async fn convert_reservation(
        &self,
        reservation_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;

        let updated = diesel::update(
            inventory_reservations::table
                .find(reservation_id)
                .filter(inventory_reservations::status.eq(ReservationStatus::Active.as_str())),
        )
        .set((
            inventory_reservations::status.eq(ReservationStatus::Converted.as_str()),
            inventory_reservations::order_id.eq(Some(order_id)),
            inventory_reservations::updated_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            let existing: Option<Reservation> = inventory_reservations::table
                .find(reservation_id)
                .first(&mut conn)
                .await
                .optional()?;
            return Err(match existing {
                None => EngineError::ReservationNotFound(reservation_id),
                Some(_) => EngineError::ReservationNotActive(reservation_id),
            });
        }

        info!(
            reservation_id = %reservation_id,
            order_id = %order_id,
            "reservation converted"
        );
        Ok(())
    }

    /// Sweep every active reservation whose deadline has passed. Idempotent;
    /// an empty sweep is success.
    pub async fn expire_reservations(&self) -> Result<usize, EngineError> {
        self.expire_reservations_at(Utc::now()).await
    }

    pub async fn expire_reservations_at(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;

        let expired = diesel::update(
            inventory_reservations::table
                .filter(inventory_reservations::status.eq(ReservationStatus::Active.as_str()))
                .filter(inventory_reservations::expires_at.le(now)),
        )
        .set((
            inventory_reservations::status.eq(ReservationStatus::Expired.as_str()),
            inventory_reservations::updated_at.eq(Some(now)),
        ))
        .execute(&mut conn)
        .await?;

        if expired > 0 {
            info!(count = expired, "expired stale reservations");
        }
        Ok(expired)
    }
}
