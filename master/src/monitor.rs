use std::sync::Arc;
use tracing::debug;

use crate::pool::ConnectionPool;

/// Un reloj por worker: cada uno revisa su conexión de forma independiente,
/// así un connect lento no atrasa a los demás.
pub fn run_health_checks(pool: Arc<ConnectionPool>) {
    for index in 0..pool.workers().len() {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.health_interval());
            loop {
                ticker.tick().await;
                let worker = pool.workers()[index].clone();
                debug!("health check de {}", worker.address());
                pool.check(&worker).await;
            }
        });
    }
}
