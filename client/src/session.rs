use anyhow::{anyhow, Context, Result};
use common::{read_message, write_message, FrameSplitter, Message};
use tokio::net::TcpStream;

/// Conexión de un pedido/respuesta con el master.
pub struct Session {
    stream: TcpStream,
    splitter: FrameSplitter,
}

impl Session {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("no se pudo conectar al master en {addr}"))?;
        Ok(Self {
            stream,
            splitter: FrameSplitter::new(),
        })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        write_message(&mut self.stream, msg).await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Message> {
        read_message(&mut self.stream, &mut self.splitter)
            .await?
            .ok_or_else(|| anyhow!("el master cerró la conexión"))
    }

    /// Manda `msg` y espera la primera respuesta.
    pub async fn request(&mut self, msg: &Message) -> Result<Message> {
        self.send(msg).await?;
        self.receive().await
    }
}
