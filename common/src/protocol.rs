//! Framing del protocolo binario:
//!
//! `[magic u32][comando u32][largo u32][payload][__\r\n__]`
//!
//! Enteros en big endian. El largo manda a la hora de extraer el payload;
//! el delimitador tiene que estar justo donde el largo dice que termina.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::Message;

pub const MAGIC: u32 = 0x1234_5678;
pub const DELIMITER: &[u8; 6] = b"__\r\n__";
pub const HEADER_LEN: usize = 12;
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

/// Ids de comando. No renumerar: los huecos (3 a 7 y 9) quedan reservados.
pub mod command {
    // cliente -> master
    pub const CREATE_REQUEST: u32 = 1;
    pub const LS: u32 = 2;
    pub const FILE_PACKET: u32 = 8;
    pub const RESULT: u32 = 10;
    pub const NAME_ITEM: u32 = 11;
    pub const RM_PARTITION: u32 = 12;
    pub const DOWNLOAD_REQUEST: u32 = 13;
    pub const USER_PROGRAM: u32 = 14;

    // master <-> worker
    pub const DO_MAP: u32 = 15;
    pub const DO_REDUCE: u32 = 16;
    pub const GET_REDUCE_RESULT: u32 = 19;

    pub const JOB_QUERY: u32 = 17;
    pub const JOB_RESULT: u32 = 18;

    pub const ALL: [u32; 13] = [
        CREATE_REQUEST,
        LS,
        FILE_PACKET,
        RESULT,
        NAME_ITEM,
        RM_PARTITION,
        DOWNLOAD_REQUEST,
        USER_PROGRAM,
        DO_MAP,
        DO_REDUCE,
        JOB_QUERY,
        JOB_RESULT,
        GET_REDUCE_RESULT,
    ];
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("protocolo incorrecto: magic {got:#010x}")]
    ProtocolMismatch { got: u32 },
    #[error("comando desconocido: {0}")]
    UnknownCommand(u32),
    #[error("frame truncado")]
    Truncated,
    #[error("delimitador de frame inválido")]
    BadDelimiter,
    #[error("frame demasiado grande: {len} bytes")]
    FrameTooLarge { len: usize },
    #[error("payload inválido: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("error de I/O: {0}")]
    Io(#[from] std::io::Error),
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Serializa un mensaje a un frame completo, delimitador incluido.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = msg.payload()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CodecError::FrameTooLarge { len: payload.len() })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + DELIMITER.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&msg.command().to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(DELIMITER);
    Ok(frame)
}

/// Decodifica un frame. El delimitador final es opcional: sólo se usa el
/// largo del header.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    if frame.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    let magic = read_u32(frame, 0);
    if magic != MAGIC {
        return Err(CodecError::ProtocolMismatch { got: magic });
    }
    let cmd = read_u32(frame, 4);
    let len = read_u32(frame, 8) as usize;
    let payload = frame
        .get(HEADER_LEN..HEADER_LEN + len)
        .ok_or(CodecError::Truncated)?;

    Message::from_payload(cmd, payload)
}

/// Corta un stream de bytes en frames.
///
/// Con el header completo usa el largo para saber dónde termina el frame y
/// verifica el delimitador. Si algo no cuadra descarta bytes hasta el
/// siguiente magic y devuelve el error, así un frame roto no tumba la
/// conexión.
#[derive(Debug)]
pub struct FrameSplitter {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let magic = read_u32(&self.buf, 0);
        if magic != MAGIC {
            return self.resync(CodecError::ProtocolMismatch { got: magic });
        }

        let len = read_u32(&self.buf, 8) as usize;
        if len > self.max_frame {
            return self.resync(CodecError::FrameTooLarge { len });
        }

        let end = HEADER_LEN + len;
        let total = end + DELIMITER.len();
        if self.buf.len() < total {
            return None;
        }
        if &self.buf[end..total] != DELIMITER {
            return self.resync(CodecError::BadDelimiter);
        }

        let frame: Vec<u8> = self.buf.drain(..total).collect();
        Some(Ok(frame))
    }

    /// Descarta hasta el próximo magic. Si no aparece, se quedan sólo los
    /// últimos bytes por si el magic llegó partido.
    fn resync(&mut self, err: CodecError) -> Option<Result<Vec<u8>, CodecError>> {
        let magic = MAGIC.to_be_bytes();
        match find(&self.buf[1..], &magic) {
            Some(pos) => {
                self.buf.drain(..pos + 1);
            }
            None => {
                let keep = magic.len() - 1;
                let cut = self.buf.len().saturating_sub(keep);
                self.buf.drain(..cut);
            }
        }
        Some(Err(err))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Lee el próximo mensaje. `Ok(None)` cuando el otro lado cerró.
pub async fn read_message<R>(
    reader: &mut R,
    splitter: &mut FrameSplitter,
) -> Result<Option<Message>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        if let Some(frame) = splitter.next_frame() {
            return decode(&frame?).map(Some);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        splitter.push(&chunk[..n]);
    }
}
