use common::{Message, WorkerAddress};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use crate::connection::{spawn_connection, Inbound, Peer};
use crate::error::{MasterError, Result};
use crate::state::lock;

#[derive(Debug, Default)]
struct SlotState {
    peer: Option<Peer>,
    connected: bool,
    failures: u32,
    next_attempt: Option<Instant>,
}

/// Conexión saliente hacia un worker configurado.
///
/// El handle y la marca de conectado se leen y se cambian siempre juntos,
/// bajo el mismo lock.
#[derive(Debug)]
pub struct WorkerConnection {
    address: WorkerAddress,
    state: Mutex<SlotState>,
}

impl WorkerConnection {
    fn new(address: WorkerAddress) -> Self {
        Self {
            address,
            state: Mutex::new(SlotState::default()),
        }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Sano = el connect salió bien y el transporte sigue vivo.
    pub fn healthy(&self) -> bool {
        self.healthy_peer().is_some()
    }

    fn healthy_peer(&self) -> Option<Peer> {
        let state = lock(&self.state);
        match &state.peer {
            Some(peer) if state.connected && peer.is_live() => Some(peer.clone()),
            _ => None,
        }
    }

    fn mark_broken(&self, peer_id: &str) {
        let mut state = lock(&self.state);
        if state.peer.as_ref().map(Peer::id) == Some(peer_id) {
            state.connected = false;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub address: String,
    pub connected: bool,
    pub healthy: bool,
    pub failures: u32,
}

/// Pool de conexiones salientes, una por worker configurado.
pub struct ConnectionPool {
    workers: Vec<Arc<WorkerConnection>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    health_interval: Duration,
    max_backoff: Duration,
    connect_timeout: Duration,
    rr_cursor: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(
        addresses: Vec<WorkerAddress>,
        inbound: mpsc::UnboundedSender<Inbound>,
        health_interval: Duration,
        max_backoff: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            workers: addresses
                .into_iter()
                .map(|a| Arc::new(WorkerConnection::new(a)))
                .collect(),
            inbound,
            health_interval,
            max_backoff,
            connect_timeout,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    pub fn workers(&self) -> &[Arc<WorkerConnection>] {
        &self.workers
    }

    pub fn health_interval(&self) -> Duration {
        self.health_interval
    }

    fn find(&self, address: &WorkerAddress) -> Option<&Arc<WorkerConnection>> {
        self.workers.iter().find(|w| &w.address == address)
    }

    /// Manda `msg` por la conexión de `worker`. Si el envío falla, la
    /// conexión queda marcada como caída.
    fn send_via(&self, worker: &WorkerConnection, msg: &Message) -> bool {
        let Some(peer) = worker.healthy_peer() else {
            return false;
        };
        match peer.send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("envío a {} falló: {}", worker.address, e);
                worker.mark_broken(peer.id());
                false
            }
        }
    }

    /// Primer worker sano de `candidates` (en el orden del pool) que acepte
    /// el mensaje. `None` si ninguno está disponible.
    pub fn dispatch_to_partition_owner(
        &self,
        candidates: &[WorkerAddress],
        msg: &Message,
    ) -> Option<WorkerAddress> {
        self.workers
            .iter()
            .filter(|w| candidates.contains(&w.address))
            .find(|w| self.send_via(w, msg))
            .map(|w| w.address.clone())
    }

    /// Cualquier worker sano, en round robin.
    pub fn dispatch_to_any(&self, msg: &Message) -> Option<WorkerAddress> {
        let n = self.workers.len();
        if n == 0 {
            return None;
        }
        let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|i| &self.workers[(start + i) % n])
            .find(|w| self.send_via(w, msg))
            .map(|w| w.address.clone())
    }

    pub fn send_to(&self, address: &WorkerAddress, msg: &Message) -> Result<()> {
        match self.find(address) {
            Some(w) if self.send_via(w, msg) => Ok(()),
            _ => Err(MasterError::WorkerUnavailable(address.to_string())),
        }
    }

    /// Manda `msg` a todos los workers sanos y llama a `on_all_acknowledged`
    /// una sola vez, cuando cada envío terminó. Sin workers sanos se llama
    /// enseguida. Devuelve cuántos envíos se hicieron.
    pub fn broadcast<F>(&self, msg: &Message, on_all_acknowledged: F) -> usize
    where
        F: FnOnce() + Send + 'static,
    {
        let mut acks = Vec::new();
        for worker in &self.workers {
            let Some(peer) = worker.healthy_peer() else {
                continue;
            };
            match peer.send_acked(msg) {
                Ok(rx) => acks.push((worker.address.clone(), rx)),
                Err(e) => {
                    warn!("broadcast a {} falló: {}", worker.address, e);
                    worker.mark_broken(peer.id());
                }
            }
        }

        let issued = acks.len();
        if issued == 0 {
            on_all_acknowledged();
            return 0;
        }

        tokio::spawn(async move {
            for (address, rx) in acks {
                // Un ack perdido cuenta igual: la conexión murió y no va a llegar.
                if !matches!(rx.await, Ok(true)) {
                    warn!("broadcast a {} no se pudo escribir", address);
                }
            }
            on_all_acknowledged();
        });
        issued
    }

    /// El otro lado cerró la conexión: se limpia el slot para que el
    /// health check la vuelva a levantar cuanto antes.
    pub fn release(&self, address: &WorkerAddress) {
        let Some(worker) = self.find(address) else {
            return;
        };
        let mut state = lock(&worker.state);
        if let Some(peer) = state.peer.take() {
            peer.close();
        }
        state.connected = false;
        state.failures = 0;
        state.next_attempt = None;
        info!("conexión con {} liberada", address);
    }

    /// Id del handle vigente para `address`, si hay uno.
    pub fn current_peer_id(&self, address: &WorkerAddress) -> Option<String> {
        let worker = self.find(address)?;
        let state = lock(&worker.state);
        state.peer.as_ref().map(|p| p.id().to_string())
    }

    /// Deja `peer` como conexión vigente del worker, cerrando la anterior.
    pub fn install(&self, address: &WorkerAddress, peer: Peer) {
        let Some(worker) = self.find(address) else {
            peer.close();
            return;
        };
        let mut state = lock(&worker.state);
        if let Some(old) = state.peer.replace(peer) {
            old.close();
        }
        state.connected = true;
        state.failures = 0;
        state.next_attempt = None;
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.health_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Un ciclo de health check para un worker: si no está sano y ya pasó
    /// el backoff, cierra el handle viejo y reconecta.
    pub async fn check(&self, worker: &WorkerConnection) {
        if worker.healthy() {
            return;
        }
        {
            let mut state = lock(&worker.state);
            if let Some(stale) = state.peer.take() {
                // conexión muerta sin aviso del otro lado (p. ej. una escritura
                // fallida): el dispatcher recupera sus tareas en vuelo
                stale.close();
                let _ = self.inbound.send(Inbound::Closed(stale));
            }
            state.connected = false;
            if let Some(at) = state.next_attempt {
                if Instant::now() < at {
                    return;
                }
            }
        }

        let address = worker.address.clone();
        info!("conectando a {}", address);
        let attempt = timeout(
            self.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await;

        match attempt {
            Ok(Ok(stream)) => {
                let peer = spawn_connection(stream, Some(address.clone()), self.inbound.clone());
                self.install(&address, peer);
                info!("conectado a {}", address);
            }
            Ok(Err(e)) => self.record_failure(worker, &e.to_string()),
            Err(_) => self.record_failure(worker, "timeout"),
        }
    }

    fn record_failure(&self, worker: &WorkerConnection, reason: &str) {
        let mut state = lock(&worker.state);
        state.failures = state.failures.saturating_add(1);
        let wait = self.backoff(state.failures);
        state.next_attempt = Some(Instant::now() + wait);
        warn!(
            "conexión a {} falló ({}), intento {} - próximo en {:?}",
            worker.address, reason, state.failures, wait
        );
    }

    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|w| {
                let healthy = w.healthy();
                let state = lock(&w.state);
                WorkerStatus {
                    address: w.address.to_string(),
                    connected: state.connected,
                    healthy,
                    failures: state.failures,
                }
            })
            .collect()
    }

    pub fn shutdown(&self) {
        for worker in &self.workers {
            let mut state = lock(&worker.state);
            if let Some(peer) = state.peer.take() {
                peer.close();
            }
            state.connected = false;
        }
        debug!("pool de conexiones cerrado");
    }
}
