// master/src/state.rs

use anyhow::{Context, Result};
use std::{
    fs,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;

use crate::barrier::ResultBarrier;
use crate::compiler::DagCompiler;
use crate::config::MasterConfig;
use crate::connection::Inbound;
use crate::namespace::{LocalNamespace, Namespace};
use crate::pool::ConnectionPool;
use crate::store::{FsJobStore, JobStore, ProgramStore};
use crate::tracker::JobTracker;

/// Toma el lock aunque otro hilo haya entrado en pánico con él tomado.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub tracker: Arc<JobTracker>,
    pub barrier: Arc<ResultBarrier>,
    pub namespace: Arc<dyn Namespace>,
    pub programs: Arc<ProgramStore>,
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn build(config: &MasterConfig, inbound: mpsc::UnboundedSender<Inbound>) -> Result<Self> {
        fs::create_dir_all(&config.root_dir)
            .with_context(|| format!("no se pudo crear {}", config.root_dir.display()))?;

        let pool = Arc::new(ConnectionPool::new(
            config.workers.clone(),
            inbound,
            config.health_check_interval,
            config.max_backoff,
            config.connect_timeout,
        ));
        let namespace: Arc<dyn Namespace> = Arc::new(
            LocalNamespace::open(
                &config.root_dir,
                config.workers.clone(),
                config.partition_size,
                config.replication,
            )
            .context("namespace")?,
        );
        let store: Arc<dyn JobStore> =
            Arc::new(FsJobStore::open(&config.root_dir).context("registro de jobs")?);
        let programs = Arc::new(ProgramStore::open(&config.root_dir).context("programas")?);

        let tracker = Arc::new(JobTracker::new(
            pool.clone(),
            namespace.clone(),
            Arc::new(DagCompiler),
            store.clone(),
            config.max_dispatch_attempts,
        ));
        let barrier = Arc::new(ResultBarrier::new(
            pool.clone(),
            store.clone(),
            config.result_timeout,
        ));

        Ok(Self {
            pool,
            tracker,
            barrier,
            namespace,
            programs,
            store,
        })
    }
}
