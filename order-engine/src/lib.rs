pub mod checkout;
pub mod lifecycle;
pub mod models;
pub mod movements;
pub mod reservations;
pub mod schema;
pub mod sweeper;

use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use shared::EngineError;

pub use checkout::{CheckoutCoordinator, CheckoutRequest, OrderLine};
pub use lifecycle::OrderLifecycle;
pub use movements::{MovementRecorder, MovementRequest, StockCorrection};
pub use reservations::ReservationManager;
pub use sweeper::ReservationSweeper;

pub type DbPool = Pool<AsyncPgConnection>;

/// Build the shared connection pool every engine component clones.
pub async fn connect_pool(database_url: &str) -> Result<DbPool, EngineError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder()
        .build(config)
        .await
        .map_err(EngineError::pool)
}
