use common::{encode, FrameSplitter, Message, WorkerAddress};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::error::{MasterError, Result};

/// Un frame listo para escribir. `ack` se dispara cuando el frame salió
/// por el socket (o cuando la escritura falló).
#[derive(Debug)]
pub struct Outbound {
    pub frame: Vec<u8>,
    pub ack: Option<oneshot::Sender<bool>>,
}

/// Evento que las conexiones le pasan al dispatcher.
#[derive(Debug)]
pub enum Inbound {
    Message(Peer, Message),
    Closed(Peer),
}

#[derive(Debug)]
struct ConnTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Extremo de escritura de una conexión, compartible entre hilos.
#[derive(Debug, Clone)]
pub struct Peer {
    id: String,
    worker: Option<WorkerAddress>,
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
    tasks: Option<Arc<ConnTasks>>,
}

impl Peer {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Worker al que apunta, si es una conexión saliente del pool.
    pub fn worker(&self) -> Option<&WorkerAddress> {
        self.worker.as_ref()
    }

    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    pub fn send(&self, msg: &Message) -> Result<()> {
        self.push(encode(msg)?, None)
    }

    /// Igual que `send`, pero avisa cuando el frame terminó de escribirse.
    /// El receptor recibe `false` si la escritura falló.
    pub fn send_acked(&self, msg: &Message) -> Result<oneshot::Receiver<bool>> {
        let (ack, rx) = oneshot::channel();
        self.push(encode(msg)?, Some(ack))?;
        Ok(rx)
    }

    fn push(&self, frame: Vec<u8>, ack: Option<oneshot::Sender<bool>>) -> Result<()> {
        if !self.is_live() {
            return Err(MasterError::WorkerUnavailable(self.label()));
        }
        self.tx
            .send(Outbound { frame, ack })
            .map_err(|_| MasterError::WorkerUnavailable(self.label()))
    }

    fn label(&self) -> String {
        match &self.worker {
            Some(w) => w.to_string(),
            None => self.id.clone(),
        }
    }

    /// Cierra la conexión. El handle no se reutiliza después de esto.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tasks) = &self.tasks {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }

    /// Peer sin socket: lo que se "escribe" queda en el receptor.
    #[cfg(test)]
    pub fn detached(
        id: &str,
        worker: Option<WorkerAddress>,
    ) -> (Peer, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer {
            id: id.to_string(),
            worker,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            tasks: None,
        };
        (peer, rx)
    }
}

/// Arranca las tareas de lectura y escritura de un socket. Cada mensaje
/// decodificado se entrega por `inbound`; al cerrarse se manda `Closed`.
pub fn spawn_connection(
    stream: TcpStream,
    worker: Option<WorkerAddress>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> Peer {
    let id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let closed = Arc::new(AtomicBool::new(false));
    let (mut read_half, mut write_half) = stream.into_split();

    let writer_closed = closed.clone();
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let written = match write_half.write_all(&out.frame).await {
                Ok(()) => write_half.flush().await.is_ok(),
                Err(_) => false,
            };
            if let Some(ack) = out.ack {
                let _ = ack.send(written);
            }
            if !written {
                warn!("error escribiendo en la conexión {}", writer_id);
                writer_closed.store(true, Ordering::SeqCst);
                break;
            }
        }
    });

    // El reader necesita el Peer para etiquetar lo que entrega; se arma
    // antes de tener sus propios handles.
    let (peer_tx, peer_rx) = oneshot::channel::<Peer>();
    let reader_closed = closed.clone();
    let reader = tokio::spawn(async move {
        let Ok(peer) = peer_rx.await else {
            return;
        };
        let mut splitter = FrameSplitter::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            while let Some(frame) = splitter.next_frame() {
                match frame.and_then(|f| common::decode(&f)) {
                    Ok(msg) => {
                        debug!("comando {} desde {}", msg.command(), peer.id());
                        if inbound.send(Inbound::Message(peer.clone(), msg)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("frame descartado en {}: {}", peer.id(), e),
                }
            }
            match read_half.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => splitter.push(&chunk[..n]),
                Err(e) => {
                    debug!("error leyendo de {}: {}", peer.id(), e);
                    break;
                }
            }
        }
        reader_closed.store(true, Ordering::SeqCst);
        let _ = inbound.send(Inbound::Closed(peer));
    });

    let peer = Peer {
        id,
        worker,
        tx,
        closed,
        tasks: Some(Arc::new(ConnTasks { reader, writer })),
    };
    let _ = peer_tx.send(peer.clone());
    peer
}
