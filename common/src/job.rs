use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::name::WorkerAddress;

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Init,
    Running,
    Suspended,
    Failed,
    Finished,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Map,
    Reduce,
}

/// Un paso del programa compilado. `function` es opaca para el master,
/// sólo se reenvía a los workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStage {
    pub kind: StageKind,
    pub function: String,
}

impl JobStage {
    pub fn map(function: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Map,
            function: function.into(),
        }
    }

    pub fn reduce(function: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Reduce,
            function: function.into(),
        }
    }
}

/// Archivo (intermedio o final) que vive en un worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub server: WorkerAddress,
    pub file: String,
}

/// Una tarea asignada: qué worker procesa qué partición.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskSlot {
    pub worker: WorkerAddress,
    pub partition: u32,
}

/// Una etapa está completa cuando lo terminado cubre exactamente lo esperado.
pub fn stage_satisfied(expected: &BTreeSet<TaskSlot>, finished: &BTreeSet<TaskSlot>) -> bool {
    finished.is_superset(expected) && finished.len() == expected.len()
}

/// Estado mutable de la ejecución de un job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    /// Archivo de entrada en el namespace.
    pub file: String,
    pub stages: Vec<JobStage>,

    /// Cantidad de etapas lanzadas. La etapa activa es `stages[pc - 1]`.
    pub pc: usize,

    pub mapper: BTreeSet<TaskSlot>,
    pub finished_mapper: BTreeSet<TaskSlot>,
    pub reducer: BTreeSet<TaskSlot>,
    pub finished_reducer: BTreeSet<TaskSlot>,

    /// partición de reduce -> archivos intermedios generados por los mappers
    pub map_intermediate_files: BTreeMap<u32, Vec<FileRef>>,
    /// partición de reduce -> archivos de resultado generados por los reducers
    pub reduce_result_files: BTreeMap<u32, Vec<FileRef>>,

    /// Particiones de la etapa activa que todavía no se pudieron despachar.
    pub pending_partitions: Vec<u32>,
    /// Ticks en los que la etapa activa quedó con particiones sin despachar.
    pub dispatch_attempts: u32,

    /// Motivo del fallo, si el job terminó en FAILED.
    pub failure: Option<String>,
}

impl JobContext {
    pub fn new(file: impl Into<String>, stages: Vec<JobStage>) -> Self {
        Self {
            file: file.into(),
            stages,
            ..Self::default()
        }
    }

    pub fn current_stage(&self) -> Option<&JobStage> {
        self.pc.checked_sub(1).and_then(|i| self.stages.get(i))
    }

    pub fn all_stages_launched(&self) -> bool {
        self.pc >= self.stages.len()
    }

    pub fn map_done(&self) -> bool {
        self.pending_partitions.is_empty() && stage_satisfied(&self.mapper, &self.finished_mapper)
    }

    pub fn reduce_done(&self) -> bool {
        self.pending_partitions.is_empty()
            && stage_satisfied(&self.reducer, &self.finished_reducer)
    }

    pub fn current_stage_done(&self) -> bool {
        match self.current_stage().map(|s| s.kind) {
            Some(StageKind::Map) => self.map_done(),
            Some(StageKind::Reduce) => self.reduce_done(),
            None => true,
        }
    }

    /// Total de archivos de resultado sumando todas las particiones de reduce.
    pub fn expected_result_count(&self) -> usize {
        self.reduce_result_files.values().map(Vec::len).sum()
    }
}

/// Agrega `files` a `target` sin pisar lo que ya había.
pub fn merge_files(target: &mut BTreeMap<u32, Vec<FileRef>>, files: &BTreeMap<u32, Vec<FileRef>>) {
    for (partition, refs) in files {
        target
            .entry(*partition)
            .or_default()
            .extend(refs.iter().cloned());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Id del programa de usuario que originó el job.
    pub program_id: String,
    pub status: JobStatus,
    pub context: JobContext,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, program_id: impl Into<String>, context: JobContext) -> Self {
        Self {
            id: id.into(),
            program_id: program_id.into(),
            status: JobStatus::Init,
            context,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.context.failure = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn finish(&mut self) {
        self.status = JobStatus::Finished;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(host: &str, partition: u32) -> TaskSlot {
        TaskSlot {
            worker: WorkerAddress::new(host, 7000),
            partition,
        }
    }

    #[test]
    fn etapa_no_satisfecha_con_worker_extra() {
        let expected: BTreeSet<_> = [slot("a", 0), slot("b", 1)].into();
        let finished: BTreeSet<_> = [slot("a", 0), slot("c", 1)].into();
        assert!(!stage_satisfied(&expected, &finished));
    }

    #[test]
    fn etapa_satisfecha_con_mismo_conjunto() {
        let expected: BTreeSet<_> = [slot("a", 0), slot("a", 1)].into();
        let mut finished = BTreeSet::new();
        finished.insert(slot("a", 0));
        assert!(!stage_satisfied(&expected, &finished));
        finished.insert(slot("a", 1));
        assert!(stage_satisfied(&expected, &finished));
    }

    #[test]
    fn current_stage_sigue_al_pc() {
        let mut ctx = JobContext::new("/in", vec![JobStage::map("m"), JobStage::reduce("r")]);
        assert!(ctx.current_stage().is_none());
        ctx.pc = 1;
        assert_eq!(ctx.current_stage().unwrap().kind, StageKind::Map);
        ctx.pc = 2;
        assert_eq!(ctx.current_stage().unwrap().kind, StageKind::Reduce);
        assert!(ctx.all_stages_launched());
    }

    #[test]
    fn merge_files_agrega_sin_pisar() {
        let a = WorkerAddress::new("a", 1);
        let mut target = BTreeMap::new();
        target.insert(
            0,
            vec![FileRef {
                server: a.clone(),
                file: "x".into(),
            }],
        );
        let mut more = BTreeMap::new();
        more.insert(
            0,
            vec![FileRef {
                server: a.clone(),
                file: "y".into(),
            }],
        );
        more.insert(
            2,
            vec![FileRef {
                server: a,
                file: "z".into(),
            }],
        );

        merge_files(&mut target, &more);

        assert_eq!(target[&0].len(), 2);
        assert_eq!(target[&2].len(), 1);
    }

    #[test]
    fn job_persistido_dos_veces_es_igual() {
        let mut job = Job::new("job-1", "prog-1", JobContext::new("/in", vec![JobStage::map("m")]));
        job.context.reduce_result_files.insert(
            3,
            vec![FileRef {
                server: WorkerAddress::new("a", 1),
                file: "r3".into(),
            }],
        );
        job.context.mapper.insert(slot("a", 0));

        let first = serde_json::to_vec(&job).unwrap();
        let second = serde_json::to_vec(&job).unwrap();
        assert_eq!(first, second);

        let back: Job = serde_json::from_slice(&second).unwrap();
        assert_eq!(back, job);
    }
}
