use common::{Job, UserProgram};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::Result;

const JOB_DIR: &str = "__job__";
const PROGRAM_DIR: &str = "__program__";

/// Almacenamiento durable de jobs: un registro por id, reescrito entero
/// en cada escritura.
pub trait JobStore: Send + Sync {
    fn write(&self, job: &Job) -> Result<()>;
    fn read(&self, id: &str) -> Result<Option<Job>>;
}

/// Un archivo JSON por job bajo `<root>/__job__/`.
pub struct FsJobStore {
    dir: PathBuf,
}

impl FsJobStore {
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(JOB_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe(id)))
    }
}

/// Evita que un id con separadores escape del directorio.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

impl JobStore for FsJobStore {
    fn write(&self, job: &Job) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(job)?;
        // se escribe aparte y se renombra para no dejar registros a medias
        let tmp = self.dir.join(format!(".{}.tmp", file_safe(&job.id)));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.path_for(&job.id))?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<Job>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Guarda los programas de usuario tal como llegaron.
pub struct ProgramStore {
    dir: PathBuf,
}

impl ProgramStore {
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(PROGRAM_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn save(&self, program: &UserProgram) -> Result<()> {
        let path = self.dir.join(format!("{}.json", file_safe(&program.id)));
        fs::write(path, serde_json::to_vec_pretty(program)?)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<UserProgram>> {
        let path = self.dir.join(format!("{}.json", file_safe(id)));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::{JobContext, JobStage, JobStatus};
    use std::env;

    pub(crate) fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("master_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn job_inexistente_devuelve_none() {
        let store = FsJobStore::open(&temp_dir("store_none")).unwrap();
        assert!(store.read("nada").unwrap().is_none());
    }

    #[test]
    fn escribir_dos_veces_es_idempotente() {
        let store = FsJobStore::open(&temp_dir("store_idem")).unwrap();
        let mut job = Job::new("job-1", "prog-1", JobContext::new("/in", vec![JobStage::map("m")]));
        job.status = JobStatus::Suspended;

        store.write(&job).unwrap();
        store.write(&job).unwrap();

        assert_eq!(store.read("job-1").unwrap(), Some(job));
    }

    #[test]
    fn escribir_reemplaza_el_registro() {
        let store = FsJobStore::open(&temp_dir("store_replace")).unwrap();
        let mut job = Job::new("job-2", "prog", JobContext::default());
        store.write(&job).unwrap();

        job.finish();
        store.write(&job).unwrap();

        let back = store.read("job-2").unwrap().unwrap();
        assert_eq!(back.status, JobStatus::Finished);
    }

    #[test]
    fn programa_guardado_se_puede_leer() {
        let programs = ProgramStore::open(&temp_dir("programs")).unwrap();
        let program = UserProgram {
            id: "p/1".into(),
            content: "{}".into(),
        };
        programs.save(&program).unwrap();
        assert_eq!(programs.load("p/1").unwrap(), Some(program));
    }
}
