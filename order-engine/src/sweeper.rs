use std::time::Duration;

use tokio::time;
use tracing::error;

use crate::reservations::ReservationManager;
use crate::DbPool;

/// Periodic reservation expiry.
///
/// The sweep itself is idempotent, so running this loop alongside an external
/// scheduler calling [`ReservationManager::expire_reservations`] is harmless.
pub struct ReservationSweeper {
    manager: ReservationManager,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self {
            manager: ReservationManager::new(pool),
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.manager.expire_reservations().await {
                error!("error expiring reservations: {}", e);
            }
        }
    }
}
