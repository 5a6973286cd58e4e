use anyhow::{ensure, Context, Result};
use common::WorkerAddress;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Configuración del master, leída de variables de entorno.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub admin_addr: String,
    pub root_dir: PathBuf,
    pub workers: Vec<WorkerAddress>,

    pub tick_interval: Duration,
    pub health_check_interval: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
    pub max_dispatch_attempts: u32,
    pub result_timeout: Duration,

    pub partition_size: u64,
    pub replication: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            admin_addr: "0.0.0.0:8080".to_string(),
            root_dir: PathBuf::from("./data"),
            workers: Vec::new(),
            tick_interval: Duration::from_secs(3),
            health_check_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            max_dispatch_attempts: 5,
            result_timeout: Duration::from_secs(30),
            partition_size: 64 * 1024 * 1024,
            replication: 2,
        }
    }
}

fn parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{name}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn millis(name: &str, default: Duration) -> Result<Duration> {
    parsed(name, default.as_millis() as u64).map(Duration::from_millis)
}

pub fn parse_workers(raw: &str) -> Result<Vec<WorkerAddress>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<WorkerAddress>().map_err(anyhow::Error::msg))
        .collect()
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let workers = match env::var("MASTER_WORKERS") {
            Ok(raw) => parse_workers(&raw).context("MASTER_WORKERS")?,
            Err(_) => d.workers,
        };

        let config = Self {
            bind_addr: env::var("MASTER_BIND_ADDR").unwrap_or(d.bind_addr),
            admin_addr: env::var("MASTER_ADMIN_ADDR").unwrap_or(d.admin_addr),
            root_dir: env::var("MASTER_ROOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.root_dir),
            workers,
            tick_interval: millis("MASTER_TICK_MS", d.tick_interval)?,
            health_check_interval: millis("MASTER_HEALTH_CHECK_MS", d.health_check_interval)?,
            max_backoff: millis("MASTER_MAX_BACKOFF_MS", d.max_backoff)?,
            connect_timeout: millis("MASTER_CONNECT_TIMEOUT_MS", d.connect_timeout)?,
            max_dispatch_attempts: parsed("MASTER_MAX_DISPATCH_ATTEMPTS", d.max_dispatch_attempts)?,
            result_timeout: millis("MASTER_RESULT_TIMEOUT_MS", d.result_timeout)?,
            partition_size: parsed("MASTER_PARTITION_SIZE", d.partition_size)?,
            replication: parsed("MASTER_REPLICATION", d.replication)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Los intervalos alimentan a `tokio::time::interval`, que no acepta cero.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.tick_interval.is_zero(), "MASTER_TICK_MS debe ser mayor que 0");
        ensure!(
            !self.health_check_interval.is_zero(),
            "MASTER_HEALTH_CHECK_MS debe ser mayor que 0"
        );
        ensure!(self.partition_size > 0, "MASTER_PARTITION_SIZE debe ser mayor que 0");
        Ok(())
    }
}
