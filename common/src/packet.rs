use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::{FileRef, JobId};
use crate::name::{NameItem, WorkerAddress};
use crate::protocol::{command, CodecError};

/* --------- cliente -> master: namespace --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub remote_file: String,
    pub file_length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub file_path: String,
}

/// Contenido de una partición en tránsito.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePacket {
    pub file: String,
    pub partition: u32,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmPartition {
    pub file: String,
    pub partition: u32,
}

/// Respuesta genérica en texto plano.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultToClient {
    pub result: String,
}

/* --------- jobs --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgram {
    pub id: String,
    pub content: String,
}

/// master -> worker: ejecutar el map de una partición.
/// worker -> master: el mismo paquete con `reporter` y los intermedios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPacket {
    pub job_id: JobId,
    /// Índice de etapa (pc del job) al que pertenece la tarea.
    pub stage: usize,
    pub function: String,
    pub input_file: String,
    pub partition: u32,

    #[serde(default)]
    pub reporter: Option<WorkerAddress>,
    #[serde(default)]
    pub intermediate_files: BTreeMap<u32, Vec<FileRef>>,
}

/// master -> worker: ejecutar el reduce de una partición.
/// worker -> master: el mismo paquete con `reporter` y los resultados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducePacket {
    pub job_id: JobId,
    pub stage: usize,
    pub function: String,
    pub partition: u32,
    pub files: Vec<FileRef>,

    #[serde(default)]
    pub reporter: Option<WorkerAddress>,
    #[serde(default)]
    pub result_files: BTreeMap<u32, Vec<FileRef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusQuery {
    pub id: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultQuery {
    pub id: JobId,
}

/// master -> worker: pedir el contenido de un archivo de resultado.
/// worker -> master: la misma petición con `result` relleno.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceResultFetch {
    pub requester: String,
    pub reduce_id: u32,
    pub file: FileRef,
    #[serde(default)]
    pub result: Option<String>,
}

/// Todo lo que viaja por el protocolo. El id de comando es el único
/// discriminador en el cable.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Create(CreateRequest),
    Ls(LsRequest),
    File(FilePacket),
    Result(ResultToClient),
    NameItem(NameItem),
    RmPartition(RmPartition),
    Download(DownloadRequest),
    UserProgram(UserProgram),
    DoMap(MapPacket),
    DoReduce(ReducePacket),
    JobStatus(JobStatusQuery),
    JobResult(JobResultQuery),
    ReduceResult(ReduceResultFetch),
}

impl Message {
    pub fn command(&self) -> u32 {
        match self {
            Message::Create(_) => command::CREATE_REQUEST,
            Message::Ls(_) => command::LS,
            Message::File(_) => command::FILE_PACKET,
            Message::Result(_) => command::RESULT,
            Message::NameItem(_) => command::NAME_ITEM,
            Message::RmPartition(_) => command::RM_PARTITION,
            Message::Download(_) => command::DOWNLOAD_REQUEST,
            Message::UserProgram(_) => command::USER_PROGRAM,
            Message::DoMap(_) => command::DO_MAP,
            Message::DoReduce(_) => command::DO_REDUCE,
            Message::JobStatus(_) => command::JOB_QUERY,
            Message::JobResult(_) => command::JOB_RESULT,
            Message::ReduceResult(_) => command::GET_REDUCE_RESULT,
        }
    }

    pub(crate) fn payload(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Message::Create(p) => serde_json::to_vec(p),
            Message::Ls(p) => serde_json::to_vec(p),
            Message::File(p) => serde_json::to_vec(p),
            Message::Result(p) => serde_json::to_vec(p),
            Message::NameItem(p) => serde_json::to_vec(p),
            Message::RmPartition(p) => serde_json::to_vec(p),
            Message::Download(p) => serde_json::to_vec(p),
            Message::UserProgram(p) => serde_json::to_vec(p),
            Message::DoMap(p) => serde_json::to_vec(p),
            Message::DoReduce(p) => serde_json::to_vec(p),
            Message::JobStatus(p) => serde_json::to_vec(p),
            Message::JobResult(p) => serde_json::to_vec(p),
            Message::ReduceResult(p) => serde_json::to_vec(p),
        }
    }

    /// Reconstruye el mensaje a partir del id de comando y el payload.
    pub(crate) fn from_payload(cmd: u32, bytes: &[u8]) -> Result<Self, CodecError> {
        let msg = match cmd {
            command::CREATE_REQUEST => Message::Create(serde_json::from_slice(bytes)?),
            command::LS => Message::Ls(serde_json::from_slice(bytes)?),
            command::FILE_PACKET => Message::File(serde_json::from_slice(bytes)?),
            command::RESULT => Message::Result(serde_json::from_slice(bytes)?),
            command::NAME_ITEM => Message::NameItem(serde_json::from_slice(bytes)?),
            command::RM_PARTITION => Message::RmPartition(serde_json::from_slice(bytes)?),
            command::DOWNLOAD_REQUEST => Message::Download(serde_json::from_slice(bytes)?),
            command::USER_PROGRAM => Message::UserProgram(serde_json::from_slice(bytes)?),
            command::DO_MAP => Message::DoMap(serde_json::from_slice(bytes)?),
            command::DO_REDUCE => Message::DoReduce(serde_json::from_slice(bytes)?),
            command::JOB_QUERY => Message::JobStatus(serde_json::from_slice(bytes)?),
            command::JOB_RESULT => Message::JobResult(serde_json::from_slice(bytes)?),
            command::GET_REDUCE_RESULT => Message::ReduceResult(serde_json::from_slice(bytes)?),
            other => return Err(CodecError::UnknownCommand(other)),
        };
        Ok(msg)
    }
}

impl From<ResultToClient> for Message {
    fn from(p: ResultToClient) -> Self {
        Message::Result(p)
    }
}

impl ResultToClient {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
        }
    }
}
