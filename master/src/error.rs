use common::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("el programa no especifica archivo de entrada")]
    MissingInput,
    #[error("el archivo de entrada {0} no existe")]
    NonexistentInput(String),
    #[error("no hay worker sano para la partición {partition} del job {job}")]
    DispatchUnavailable { job: String, partition: u32 },
    #[error("no hay conexión sana con el worker {0}")]
    WorkerUnavailable(String),
    #[error("job {0} doesn't exist")]
    ResultLookup(String),
    #[error("timeout esperando resultados del job {0}")]
    ResultTimeout(String),
    #[error("programa inválido: {0}")]
    InvalidProgram(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MasterError>;
