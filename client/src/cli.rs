use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    CreateRequest, Dag, DownloadRequest, JobResultQuery, JobStatusQuery, LsRequest, Message,
    NameItem, UserProgram,
};
use std::{env, fs};

use crate::session::Session;

/// - En Docker: MASTER_ADDR=master:9000
/// - Local: default 127.0.0.1:9000
fn master_addr() -> String {
    env::var("MASTER_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    /// Dirección del master (host:puerto); pisa MASTER_ADDR
    #[arg(long, global = true)]
    master: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lista un directorio del namespace
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Da de alta un archivo y muestra dónde va cada partición
    Create {
        #[arg(value_name = "RUTA")]
        path: String,
        #[arg(value_name = "BYTES")]
        length: u64,
    },
    /// Muestra las particiones de un archivo existente
    Lookup {
        #[arg(value_name = "RUTA")]
        path: String,
    },
    /// Envía un programa (DAG en JSON) como job nuevo
    Submit {
        #[arg(value_name = "PROGRAMA_JSON")]
        file: String,
        /// Id del job; si falta se genera uno
        #[arg(long)]
        id: Option<String>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Junta los resultados de reduce de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Envía un WordCount sobre un archivo del namespace
    Wordcount {
        #[arg(value_name = "RUTA")]
        input: String,
    },
}

fn print_name_item(path: &str, item: &NameItem) {
    if !item.success {
        println!("El master no pudo ubicar {path}");
        return;
    }
    println!("Archivo {path}:");
    println!("  existe: {}", item.exist);
    println!("  tamaño: {} bytes", item.file_length);
    println!("  particiones: {} (de {} bytes)", item.partitions.len(), item.partition_size);
    for (i, replicas) in item.partitions.iter().enumerate() {
        let hosts: Vec<String> = replicas.iter().map(ToString::to_string).collect();
        println!("    {i}: {}", hosts.join(", "));
    }
}

fn expect_text(reply: Message) -> Result<String> {
    match reply {
        Message::Result(r) => Ok(r.result),
        other => bail!("respuesta inesperada del master: comando {}", other.command()),
    }
}

fn expect_name_item(reply: Message) -> Result<NameItem> {
    match reply {
        Message::NameItem(item) => Ok(item),
        Message::Result(r) => bail!("{}", r.result),
        other => bail!("respuesta inesperada del master: comando {}", other.command()),
    }
}

async fn submit(session: &mut Session, id: String, content: String) -> Result<()> {
    let reply = session
        .request(&Message::UserProgram(UserProgram { id: id.clone(), content }))
        .await?;
    println!("{}", expect_text(reply)?);
    println!("Job {id} enviado. Consultar con: client status {id}");
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let addr = cli.master.unwrap_or_else(master_addr);
    let mut session = Session::connect(&addr).await?;

    match cli.command {
        Commands::Ls { path } => {
            let reply = session.request(&Message::Ls(LsRequest { path })).await?;
            let listing = expect_text(reply)?;
            if listing.is_empty() {
                println!("(vacío)");
            } else {
                println!("{listing}");
            }
        }

        Commands::Create { path, length } => {
            let reply = session
                .request(&Message::Create(CreateRequest {
                    remote_file: path.clone(),
                    file_length: length,
                }))
                .await?;
            print_name_item(&path, &expect_name_item(reply)?);
        }

        Commands::Lookup { path } => {
            let reply = session
                .request(&Message::Download(DownloadRequest {
                    file_path: path.clone(),
                }))
                .await?;
            let item = expect_name_item(reply)?;
            if item.exist {
                print_name_item(&path, &item);
            } else {
                println!("No existe {path}");
            }
        }

        Commands::Submit { file, id } => {
            let content =
                fs::read_to_string(&file).with_context(|| format!("no se pudo leer {file}"))?;
            // se valida acá para no mandar basura al master
            serde_json::from_str::<Dag>(&content)
                .with_context(|| format!("{file} no es un DAG válido"))?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            submit(&mut session, id, content).await?;
        }

        Commands::Status { id } => {
            let reply = session
                .request(&Message::JobStatus(JobStatusQuery { id }))
                .await?;
            println!("{}", expect_text(reply)?);
        }

        Commands::Results { id } => {
            let reply = session
                .request(&Message::JobResult(JobResultQuery { id }))
                .await?;
            println!("{}", expect_text(reply)?);
        }

        Commands::Wordcount { input } => {
            let content = serde_json::to_string_pretty(&Dag::wordcount(&input))?;
            let id = uuid::Uuid::new_v4().to_string();
            submit(&mut session, id, content).await?;
        }
    }

    Ok(())
}
