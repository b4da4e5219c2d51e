use chrono::Utc;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::info;
use uuid::Uuid;

use shared::{EngineError, MovementType};

use crate::models::{InventoryMovement, NewInventoryMovement, Product};
use crate::schema::{inventory_movements, products};
use crate::DbPool;

/// Reference type recorded for ledger rows written by [`MovementRecorder::batch_update`].
const ADJUSTMENT_REFERENCE: &str = "adjustment";

#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub reason: Option<String>,
    pub user_id: Option<Uuid>,
}

/// One entry of an admin bulk correction: the absolute stock the product
/// should end up with.
#[derive(Debug, Clone)]
pub struct StockCorrection {
    pub product_id: Uuid,
    pub new_stock: i32,
    pub reason: Option<String>,
}

/// Append-only ledger of stock deltas. The ledger reconciles against stock
/// changes over time for audits; it is never the source of truth.
#[derive(Clone)]
pub struct MovementRecorder {
    pool: DbPool,
}

impl MovementRecorder {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a single movement row. Prior rows are never updated or deleted.
    pub async fn record_movement(&self, request: MovementRequest) -> Result<Uuid, EngineError> {
        if request.quantity <= 0 {
            return Err(EngineError::Validation(
                "movement quantity must be positive".into(),
            ));
        }

        let movement_id = Uuid::new_v4();
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        diesel::insert_into(inventory_movements::table)
            .values(&NewInventoryMovement {
                id: movement_id,
                product_id: request.product_id,
                movement_type: request.movement_type.as_str().to_string(),
                quantity: request.quantity,
                reference_type: request.reference_type,
                reference_id: request.reference_id,
                reason: request.reason,
                user_id: request.user_id,
            })
            .execute(&mut conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::ForeignKeyViolation,
                    _,
                ) => EngineError::ProductNotFound(request.product_id),
                other => other.into(),
            })?;

        Ok(movement_id)
    }

    /// Apply a batch of absolute stock corrections in one transaction.
    ///
    /// Each correction locks its product row, writes the new stock value, and
    /// appends a ledger row for the signed delta. One bad entry rolls the
    /// whole batch back; throughput is traded for all-or-nothing audits.
    pub async fn batch_update(
        &self,
        updates: Vec<StockCorrection>,
        admin_id: Option<Uuid>,
    ) -> Result<(), EngineError> {
        for update in &updates {
            if update.new_stock < 0 {
                return Err(EngineError::Validation(format!(
                    "target stock for product {} must not be negative",
                    update.product_id
                )));
            }
        }
        let mut updates = updates;
        updates.sort_by_key(|u| u.product_id);

        let count = updates.len();
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                for update in updates {
                    let product: Option<Product> = products::table
                        .find(update.product_id)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let product =
                        product.ok_or(EngineError::ProductNotFound(update.product_id))?;

                    let delta = update.new_stock - product.stock;

                    diesel::update(products::table.find(update.product_id))
                        .set((
                            products::stock.eq(update.new_stock),
                            products::updated_at.eq(Some(Utc::now())),
                        ))
                        .execute(conn)
                        .await?;

                    let Some((movement_type, quantity)) = movement_for_delta(delta) else {
                        continue;
                    };
                    diesel::insert_into(inventory_movements::table)
                        .values(&NewInventoryMovement {
                            id: Uuid::new_v4(),
                            product_id: update.product_id,
                            movement_type: movement_type.as_str().to_string(),
                            quantity,
                            reference_type: Some(ADJUSTMENT_REFERENCE.to_string()),
                            reference_id: None,
                            reason: update.reason,
                            user_id: admin_id,
                        })
                        .execute(conn)
                        .await?;
                }
                Ok(())
            })
        })
        .await?;

        info!(count, "stock batch correction applied");
        Ok(())
    }

    /// Newest-first audit read of a product's ledger.
    pub async fn movements_for_product(
        &self,
        product_id: Uuid,
        limit: i64,
    ) -> Result<Vec<InventoryMovement>, EngineError> {
        let mut conn = self.pool.get().await.map_err(EngineError::pool)?;
        let rows = inventory_movements::table
            .filter(inventory_movements::product_id.eq(product_id))
            .order(inventory_movements::created_at.desc())
            .limit(limit)
            .load::<InventoryMovement>(&mut conn)
            .await?;
        Ok(rows)
    }
}

/// Ledger entry for a signed stock delta; `None` when nothing moved.
fn movement_for_delta(delta: i32) -> Option<(MovementType, i32)> {
    match delta {
        0 => None,
        d if d > 0 => Some((MovementType::In, d)),
        d => Some((MovementType::Out, -d)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_delta_is_an_inbound_movement() {
        assert_eq!(movement_for_delta(7), Some((MovementType::In, 7)));
    }

    #[test]
    fn negative_delta_is_an_outbound_movement() {
        assert_eq!(movement_for_delta(-4), Some((MovementType::Out, 4)));
    }

    #[test]
    fn zero_delta_writes_no_ledger_row() {
        assert_eq!(movement_for_delta(0), None);
    }
}
