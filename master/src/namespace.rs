use common::{NameItem, WorkerAddress};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::state::lock;

const NAME_DIR: &str = "__name__";
const NAME_FILE: &str = "names.json";

/// Metadatos de archivos: dónde vive cada partición.
pub trait Namespace: Send + Sync {
    fn create_or_get(&self, path: &str, length: u64) -> Result<NameItem>;
    /// Hijos directos de `path`, uno por línea; los directorios terminan en '/'.
    fn list(&self, path: &str) -> String;
    fn lookup(&self, path: &str) -> NameItem;
}

/// Namespace en memoria, volcado a JSON en cada alta.
pub struct LocalNamespace {
    file: PathBuf,
    items: Mutex<BTreeMap<String, NameItem>>,
    cursor: Mutex<usize>,
    workers: Vec<WorkerAddress>,
    partition_size: u64,
    replication: usize,
}

impl LocalNamespace {
    pub fn open(
        root: &Path,
        workers: Vec<WorkerAddress>,
        partition_size: u64,
        replication: usize,
    ) -> Result<Self> {
        let dir = root.join(NAME_DIR);
        fs::create_dir_all(&dir)?;
        let file = dir.join(NAME_FILE);
        let items = if file.exists() {
            serde_json::from_slice(&fs::read(&file)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            file,
            items: Mutex::new(items),
            cursor: Mutex::new(0),
            workers,
            partition_size: partition_size.max(1),
            replication: replication.max(1),
        })
    }

    /// Reparte las réplicas en round robin sobre los workers configurados.
    fn place(&self, partitions: u64) -> Vec<Vec<WorkerAddress>> {
        let n = self.workers.len();
        let replicas = self.replication.min(n);
        let mut cursor = lock(&self.cursor);
        (0..partitions)
            .map(|_| {
                let start = *cursor;
                *cursor = (*cursor + 1) % n.max(1);
                (0..replicas)
                    .map(|r| self.workers[(start + r) % n].clone())
                    .collect()
            })
            .collect()
    }

    fn persist(&self, items: &BTreeMap<String, NameItem>) -> Result<()> {
        fs::write(&self.file, serde_json::to_vec_pretty(items)?)?;
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Namespace for LocalNamespace {
    fn create_or_get(&self, path: &str, length: u64) -> Result<NameItem> {
        let key = normalize(path);
        let mut items = lock(&self.items);
        if let Some(item) = items.get(&key) {
            return Ok(item.clone());
        }

        if self.workers.is_empty() {
            warn!("no hay workers para ubicar {}", key);
            let mut item = NameItem::missing();
            item.success = false;
            return Ok(item);
        }

        let partitions = length.div_ceil(self.partition_size);
        let item = NameItem {
            file_length: length,
            partition_size: self.partition_size,
            partitions: self.place(partitions),
            exist: true,
            download: false,
            success: true,
        };
        items.insert(key.clone(), item.clone());
        self.persist(&items)?;
        info!("archivo {} creado con {} particiones", key, partitions);

        // quien lo crea todavía tiene que subir los datos
        let mut created = item;
        created.exist = false;
        Ok(created)
    }

    fn list(&self, path: &str) -> String {
        let dir = normalize(path);
        let prefix = if dir == "/" {
            dir.clone()
        } else {
            format!("{dir}/")
        };

        let items = lock(&self.items);
        let children: BTreeSet<String> = items
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((child, _)) => format!("{child}/"),
                None => rest.to_string(),
            })
            .collect();

        children.into_iter().collect::<Vec<_>>().join("\n")
    }

    fn lookup(&self, path: &str) -> NameItem {
        lock(&self.items)
            .get(&normalize(path))
            .cloned()
            .unwrap_or_else(NameItem::missing)
    }
}
