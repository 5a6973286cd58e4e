use common::{Message, ResultToClient, UserProgram};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::{Inbound, Peer};
use crate::state::AppState;

/// Enruta cada mensaje entrante a quien le corresponde.
#[derive(Clone)]
pub struct CommandDispatcher {
    state: AppState,
}

impl CommandDispatcher {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Message(peer, msg) => self.handle(&peer, msg),
                Inbound::Closed(peer) => self.closed(&peer),
            }
        }
        debug!("canal de entrada cerrado, dispatcher terminado");
    }

    fn reply(&self, peer: &Peer, msg: Message) {
        if let Err(e) = peer.send(&msg) {
            warn!("no se pudo responder a {}: {}", peer.id(), e);
        }
    }

    pub fn handle(&self, peer: &Peer, msg: Message) {
        match msg {
            Message::Create(req) => {
                let reply = match self
                    .state
                    .namespace
                    .create_or_get(&req.remote_file, req.file_length)
                {
                    Ok(item) => Message::NameItem(item),
                    Err(e) => {
                        error!("create {} falló: {}", req.remote_file, e);
                        Message::from(ResultToClient::new(e.to_string()))
                    }
                };
                self.reply(peer, reply);
            }
            Message::Ls(req) => {
                let listing = self.state.namespace.list(&req.path);
                self.reply(peer, ResultToClient::new(listing).into());
            }
            Message::Download(req) => {
                let item = self.state.namespace.lookup(&req.file_path);
                self.reply(peer, Message::NameItem(item));
            }
            Message::UserProgram(program) => {
                info!("programa {} recibido", program.id);
                tokio::spawn(submit_program(self.state.clone(), peer.clone(), program));
            }
            Message::DoMap(packet) => {
                debug!("map terminado del job {} partición {}", packet.job_id, packet.partition);
                self.state.tracker.map_finished(&packet);
            }
            Message::DoReduce(packet) => {
                debug!("reduce terminado del job {} partición {}", packet.job_id, packet.partition);
                self.state.tracker.reduce_finished(&packet);
            }
            Message::JobStatus(query) => {
                let body = match self.state.tracker.get_job(&query.id) {
                    Ok(Some(job)) => serde_json::to_string_pretty(&job)
                        .unwrap_or_else(|e| e.to_string()),
                    Ok(None) => format!("job {} doesn't exist", query.id),
                    Err(e) => e.to_string(),
                };
                self.reply(peer, ResultToClient::new(body).into());
            }
            Message::JobResult(query) => {
                // la espera puede ser larga: no se bloquea al dispatcher
                let barrier = self.state.barrier.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    let requester = uuid::Uuid::new_v4().to_string();
                    let body = match barrier.aggregate(&query.id, &requester).await {
                        Ok(json) => json,
                        Err(e) => e.to_string(),
                    };
                    if let Err(e) = peer.send(&ResultToClient::new(body).into()) {
                        warn!("no se pudo responder resultados a {}: {}", peer.id(), e);
                    }
                });
            }
            Message::ReduceResult(fetch) => self.state.barrier.receive(&fetch),
            other => debug!("comando {} ignorado en el master", other.command()),
        }
    }

    fn closed(&self, peer: &Peer) {
        let Some(worker) = peer.worker() else {
            debug!("conexión {} cerrada", peer.id());
            return;
        };
        // sólo si sigue siendo el handle vigente: una reconexión ya lo pudo reemplazar
        match self.state.pool.current_peer_id(worker) {
            Some(current) if current != peer.id() => {
                debug!("cierre de un handle viejo de {}", worker);
                return;
            }
            Some(_) => self.state.pool.release(worker),
            None => {}
        }

        let requeued = self.state.tracker.requeue_worker(worker);
        if requeued > 0 {
            info!("{} tareas de {} se vuelven a despachar", requeued, worker);
        }
    }
}

/// Guarda el programa, confirma al cliente y lo reparte a los workers. El
/// job arranca recién cuando todos los workers tienen el programa.
async fn submit_program(state: AppState, peer: Peer, program: UserProgram) {
    let programs = state.programs.clone();
    let to_save = program.clone();
    let saved = tokio::task::spawn_blocking(move || programs.save(&to_save))
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));
    let reply = match &saved {
        Ok(()) => format!("program {} received", program.id),
        Err(e) => {
            error!("no se pudo guardar el programa {}: {}", program.id, e);
            e.clone()
        }
    };
    if let Err(e) = peer.send(&ResultToClient::new(reply).into()) {
        warn!("no se pudo responder a {}: {}", peer.id(), e);
    }
    if saved.is_err() {
        return;
    }

    let tracker = state.tracker.clone();
    let msg = Message::UserProgram(program.clone());
    let sent = state.pool.broadcast(&msg, move || {
        // compila y escribe el registro del job: fuera del runtime
        tokio::task::spawn_blocking(move || {
            let status = tracker.start_job(&program);
            info!("job {} registrado en estado {:?}", program.id, status);
        });
    });
    debug!("programa enviado a {} workers", sent);
}
