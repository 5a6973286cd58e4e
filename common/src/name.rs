use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Dirección de un worker (slave). Dos workers son el mismo si coinciden
/// host y puerto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for WorkerAddress {
    type Err = String;

    /// Parsea "host:port".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("dirección de worker inválida: {s}"))?;
        if host.is_empty() {
            return Err(format!("dirección de worker sin host: {s}"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("puerto inválido en {s}: {e}"))?;
        Ok(Self::new(host, port))
    }
}

/// Metadatos de un archivo en el namespace.
///
/// `partitions[i]` es la lista de workers que tienen una réplica de la
/// partición `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameItem {
    pub file_length: u64,
    pub partition_size: u64,
    pub partitions: Vec<Vec<WorkerAddress>>,

    pub exist: bool,
    pub download: bool,
    pub success: bool,
}

impl NameItem {
    /// Respuesta para un archivo que no está en el namespace.
    pub fn missing() -> Self {
        Self {
            file_length: 0,
            partition_size: 0,
            partitions: Vec::new(),
            exist: false,
            download: false,
            success: true,
        }
    }

    pub fn replicas(&self, partition: u32) -> &[WorkerAddress] {
        self.partitions
            .get(partition as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
