use common::{Message, ReduceResultFetch, WorkerAddress};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{MasterError, Result};
use crate::pool::ConnectionPool;
use crate::state::lock;
use crate::store::JobStore;

/// Archivo de resultado pedido: partición de reduce y dónde vive.
type ResultKey = (u32, WorkerAddress, String);

/// Lo que lleva acumulado una consulta de resultados.
struct PendingQuery {
    results: BTreeMap<u32, Vec<String>>,
    // archivos que todavía no respondieron; cada uno cuenta una sola vez
    outstanding: HashSet<ResultKey>,
    gate: Option<oneshot::Sender<()>>,
}

/// Junta los resultados de reduce repartidos por los workers en una sola
/// respuesta. Todo lo que guarda es por consulta y se borra al terminar.
pub struct ResultBarrier {
    pending: Mutex<HashMap<String, PendingQuery>>,
    pool: Arc<ConnectionPool>,
    store: Arc<dyn JobStore>,
    timeout: Duration,
}

impl ResultBarrier {
    pub fn new(pool: Arc<ConnectionPool>, store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            pool,
            store,
            timeout,
        }
    }

    /// Pide cada archivo de resultado del job a su worker y espera a que
    /// lleguen todos (o al timeout). Devuelve el JSON
    /// `{ partición: [resultado, ...] }`.
    pub async fn aggregate(&self, job_id: &str, requester: &str) -> Result<String> {
        let job = self
            .store
            .read(job_id)?
            .ok_or_else(|| MasterError::ResultLookup(job_id.to_string()))?;

        let expected = job.context.expected_result_count();
        let results: BTreeMap<u32, Vec<String>> = job
            .context
            .reduce_result_files
            .keys()
            .map(|k| (*k, Vec::new()))
            .collect();
        if expected == 0 {
            return Ok(serde_json::to_string(&results)?);
        }

        let outstanding: HashSet<ResultKey> = job
            .context
            .reduce_result_files
            .iter()
            .flat_map(|(k, files)| {
                files
                    .iter()
                    .map(move |f| (*k, f.server.clone(), f.file.clone()))
            })
            .collect();
        let (gate, done) = oneshot::channel();
        lock(&self.pending).insert(
            requester.to_string(),
            PendingQuery {
                results,
                outstanding: outstanding.clone(),
                gate: Some(gate),
            },
        );
        info!(
            "consulta {}: pidiendo {} resultados del job {}",
            requester,
            outstanding.len(),
            job_id
        );

        let mut asked = HashSet::new();
        for (reduce_id, files) in &job.context.reduce_result_files {
            for file in files {
                if !asked.insert((*reduce_id, file.server.clone(), file.file.clone())) {
                    continue;
                }
                let msg = Message::ReduceResult(ReduceResultFetch {
                    requester: requester.to_string(),
                    reduce_id: *reduce_id,
                    file: file.clone(),
                    result: None,
                });
                if let Err(e) = self.pool.send_to(&file.server, &msg) {
                    warn!("consulta {}: {}", requester, e);
                    lock(&self.pending).remove(requester);
                    return Err(e);
                }
            }
        }

        let outcome = tokio::time::timeout(self.timeout, done).await;
        let query = lock(&self.pending).remove(requester);

        match (outcome, query) {
            (Ok(Ok(())), Some(query)) => Ok(serde_json::to_string(&query.results)?),
            _ => {
                warn!("consulta {} del job {} sin completar", requester, job_id);
                Err(MasterError::ResultTimeout(job_id.to_string()))
            }
        }
    }

    /// Un worker devolvió el contenido de un archivo de resultado.
    pub fn receive(&self, packet: &ReduceResultFetch) {
        let Some(result) = packet.result.clone() else {
            debug!("resultado vacío para la consulta {}", packet.requester);
            return;
        };

        let mut pending = lock(&self.pending);
        let Some(query) = pending.get_mut(&packet.requester) else {
            warn!("resultado para la consulta {} que ya no existe", packet.requester);
            return;
        };

        let key = (
            packet.reduce_id,
            packet.file.server.clone(),
            packet.file.file.clone(),
        );
        if !query.outstanding.remove(&key) {
            debug!(
                "consulta {}: {} repetido o no pedido, se ignora",
                packet.requester, packet.file.file
            );
            return;
        }
        query.results.entry(packet.reduce_id).or_default().push(result);
        if query.outstanding.is_empty() {
            if let Some(gate) = query.gate.take() {
                let _ = gate.send(());
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}
