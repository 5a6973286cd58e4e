use common::{
    merge_files, FileRef, Job, JobContext, JobId, JobStatus, MapPacket, Message, ReducePacket,
    StageKind, TaskSlot, UserProgram,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::compiler::ProgramCompiler;
use crate::error::{MasterError, Result};
use crate::namespace::Namespace;
use crate::pool::ConnectionPool;
use crate::state::lock;
use crate::store::JobStore;

/// Máquina de estados de los jobs vivos.
///
/// Cada job tiene su propio lock: el tick y los reportes de los workers se
/// excluyen por job, no globalmente.
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<Job>>>>,
    pool: Arc<ConnectionPool>,
    namespace: Arc<dyn Namespace>,
    compiler: Arc<dyn ProgramCompiler>,
    store: Arc<dyn JobStore>,
    max_dispatch_attempts: u32,
}

impl JobTracker {
    pub fn new(
        pool: Arc<ConnectionPool>,
        namespace: Arc<dyn Namespace>,
        compiler: Arc<dyn ProgramCompiler>,
        store: Arc<dyn JobStore>,
        max_dispatch_attempts: u32,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            pool,
            namespace,
            compiler,
            store,
            max_dispatch_attempts: max_dispatch_attempts.max(1),
        }
    }

    /// Compila el programa y registra el job. Devuelve el estado inicial
    /// (FAILED si el programa o su entrada no sirven).
    pub fn start_job(&self, program: &UserProgram) -> JobStatus {
        info!("arrancando job {}", program.id);
        if let Some(existing) = self.live(&program.id) {
            let status = lock(&existing).status;
            warn!("el job {} ya está vivo ({:?}), se ignora", program.id, status);
            return status;
        }

        let mut job = match self.compiler.compile(&program.content) {
            Ok(compiled) => Job::new(
                program.id.clone(),
                program.id.clone(),
                JobContext::new(compiled.file, compiled.stages),
            ),
            Err(e) => {
                let mut job = Job::new(program.id.clone(), program.id.clone(), JobContext::default());
                job.fail(e.to_string());
                job
            }
        };

        if job.status == JobStatus::Init {
            if let Err(e) = self.check_input(&job.context) {
                warn!("job {}: {}", job.id, e);
                job.fail(e.to_string());
            }
        }

        // el registro existe desde ya: las consultas de estado no fallan
        self.persist(&job);
        let status = job.status;
        lock(&self.jobs)
            .entry(job.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(job)));
        status
    }

    fn check_input(&self, ctx: &JobContext) -> Result<()> {
        if ctx.file.is_empty() {
            return Err(MasterError::MissingInput);
        }
        if !self.namespace.lookup(&ctx.file).exist {
            return Err(MasterError::NonexistentInput(ctx.file.clone()));
        }
        Ok(())
    }

    fn live(&self, id: &str) -> Option<Arc<Mutex<Job>>> {
        lock(&self.jobs).get(id).cloned()
    }

    /// Copia del job vivo, si todavía está en la tabla.
    pub fn snapshot(&self, id: &str) -> Option<Job> {
        self.live(id).map(|job| lock(&job).clone())
    }

    pub fn live_jobs(&self) -> Vec<Job> {
        let handles: Vec<_> = lock(&self.jobs).values().cloned().collect();
        handles.iter().map(|job| lock(job).clone()).collect()
    }

    /// Lee el registro durable, esté o no el job en la tabla.
    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.read(id)
    }

    fn persist(&self, job: &Job) {
        if let Err(e) = self.store.write(job) {
            error!("no se pudo guardar el job {}: {}", job.id, e);
        }
    }

    /// Una vuelta del reloj sobre todos los jobs vivos.
    pub fn tick(&self) {
        let handles: Vec<_> = lock(&self.jobs).values().cloned().collect();
        let mut to_remove = Vec::new();

        for handle in handles {
            let snapshot = {
                let mut job = lock(&handle);
                debug!("job {} en estado {:?}", job.id, job.status);
                if self.step(&mut job) {
                    to_remove.push(job.id.clone());
                }
                job.clone()
            };
            self.persist(&snapshot);
        }

        if !to_remove.is_empty() {
            let mut jobs = lock(&self.jobs);
            for id in to_remove {
                jobs.remove(&id);
            }
        }
    }

    /// Avanza un job. Devuelve true si tiene que salir de la tabla.
    fn step(&self, job: &mut Job) -> bool {
        match job.status {
            JobStatus::Init => {
                job.status = JobStatus::Running;
                false
            }
            JobStatus::Running => {
                if job.context.all_stages_launched() {
                    info!("job {} terminado", job.id);
                    job.finish();
                    return false;
                }
                job.context.pc += 1;
                self.run_current_stage(job);
                false
            }
            JobStatus::Suspended => {
                if !job.context.pending_partitions.is_empty() {
                    self.dispatch_pending(job);
                }
                false
            }
            JobStatus::Failed => {
                warn!(
                    "job {} falló: {}",
                    job.id,
                    job.context.failure.as_deref().unwrap_or("sin motivo")
                );
                true
            }
            JobStatus::Finished => true,
        }
    }

    fn run_current_stage(&self, job: &mut Job) {
        let Some(stage) = job.context.current_stage().cloned() else {
            return;
        };
        job.context.dispatch_attempts = 0;

        match stage.kind {
            StageKind::Map => {
                let item = self.namespace.lookup(&job.context.file);
                if !item.exist {
                    let err = MasterError::NonexistentInput(job.context.file.clone());
                    job.fail(err.to_string());
                    return;
                }
                job.context.mapper.clear();
                job.context.finished_mapper.clear();
                job.context.pending_partitions = (0..item.partitions.len() as u32).collect();
            }
            StageKind::Reduce => {
                job.context.reducer.clear();
                job.context.finished_reducer.clear();
                job.context.pending_partitions =
                    job.context.map_intermediate_files.keys().copied().collect();
            }
        }

        info!(
            "job {}: etapa {} ({:?} {}) con {} particiones",
            job.id,
            job.context.pc,
            stage.kind,
            stage.function,
            job.context.pending_partitions.len()
        );
        job.status = JobStatus::Suspended;
        self.dispatch_pending(job);

        // etapa sin nada que despachar: no hay reportes que esperar
        if job.status == JobStatus::Suspended && job.context.current_stage_done() {
            job.status = JobStatus::Running;
        }
    }

    /// Intenta despachar las particiones pendientes de la etapa activa. Lo
    /// que no encuentra worker queda pendiente para el próximo tick, hasta
    /// `max_dispatch_attempts`; después el job falla.
    fn dispatch_pending(&self, job: &mut Job) {
        let Some(stage) = job.context.current_stage().cloned() else {
            return;
        };
        let pending = std::mem::take(&mut job.context.pending_partitions);
        let mut undispatched = Vec::new();

        match stage.kind {
            StageKind::Map => {
                let item = self.namespace.lookup(&job.context.file);
                for partition in pending {
                    let msg = Message::DoMap(MapPacket {
                        job_id: job.id.clone(),
                        stage: job.context.pc,
                        function: stage.function.clone(),
                        input_file: job.context.file.clone(),
                        partition,
                        reporter: None,
                        intermediate_files: BTreeMap::new(),
                    });
                    match self
                        .pool
                        .dispatch_to_partition_owner(item.replicas(partition), &msg)
                    {
                        Some(worker) => {
                            info!("map de la partición {} del job {} en {}", partition, job.id, worker);
                            job.context.mapper.insert(TaskSlot { worker, partition });
                        }
                        None => undispatched.push(partition),
                    }
                }
            }
            StageKind::Reduce => {
                for partition in pending {
                    let files: Vec<FileRef> = job
                        .context
                        .map_intermediate_files
                        .get(&partition)
                        .cloned()
                        .unwrap_or_default();
                    let msg = Message::DoReduce(ReducePacket {
                        job_id: job.id.clone(),
                        stage: job.context.pc,
                        function: stage.function.clone(),
                        partition,
                        files,
                        reporter: None,
                        result_files: BTreeMap::new(),
                    });
                    match self.pool.dispatch_to_any(&msg) {
                        Some(worker) => {
                            info!("reduce de la partición {} del job {} en {}", partition, job.id, worker);
                            job.context.reducer.insert(TaskSlot { worker, partition });
                        }
                        None => undispatched.push(partition),
                    }
                }
            }
        }

        if undispatched.is_empty() {
            return;
        }

        job.context.dispatch_attempts += 1;
        warn!(
            "job {}: {} particiones sin worker sano (intento {}/{})",
            job.id,
            undispatched.len(),
            job.context.dispatch_attempts,
            self.max_dispatch_attempts
        );
        let first = undispatched[0];
        job.context.pending_partitions = undispatched;
        if job.context.dispatch_attempts >= self.max_dispatch_attempts {
            let err = MasterError::DispatchUnavailable {
                job: job.id.clone(),
                partition: first,
            };
            job.fail(err.to_string());
        }
    }

    /// Un mapper terminó su partición.
    pub fn map_finished(&self, packet: &MapPacket) -> Option<JobStatus> {
        self.fold(
            &packet.job_id,
            packet.stage,
            StageKind::Map,
            packet.reporter.clone(),
            packet.partition,
            &packet.intermediate_files,
        )
    }

    /// Un reducer terminó su partición.
    pub fn reduce_finished(&self, packet: &ReducePacket) -> Option<JobStatus> {
        self.fold(
            &packet.job_id,
            packet.stage,
            StageKind::Reduce,
            packet.reporter.clone(),
            packet.partition,
            &packet.result_files,
        )
    }

    /// El worker perdió su conexión: lo que tenía asignado y no reportó vuelve
    /// a quedar pendiente en cada job vivo. Devuelve cuántas tareas se
    /// recuperaron.
    pub fn requeue_worker(&self, worker: &common::WorkerAddress) -> usize {
        let handles: Vec<_> = lock(&self.jobs).values().cloned().collect();
        let mut requeued = 0;

        for handle in handles {
            let mut job = lock(&handle);
            if job.status != JobStatus::Suspended {
                continue;
            }
            let Some(kind) = job.context.current_stage().map(|s| s.kind) else {
                continue;
            };
            let ctx = &mut job.context;
            let (expected, finished) = match kind {
                StageKind::Map => (&mut ctx.mapper, &ctx.finished_mapper),
                StageKind::Reduce => (&mut ctx.reducer, &ctx.finished_reducer),
            };
            let lost: Vec<TaskSlot> = expected
                .iter()
                .filter(|s| &s.worker == worker && !finished.contains(s))
                .cloned()
                .collect();
            if lost.is_empty() {
                continue;
            }
            for slot in &lost {
                expected.remove(slot);
                if !ctx.pending_partitions.contains(&slot.partition) {
                    ctx.pending_partitions.push(slot.partition);
                }
            }
            warn!(
                "job {}: {} tareas de {} vuelven a quedar pendientes",
                job.id,
                lost.len(),
                worker
            );
            requeued += lost.len();
        }
        requeued
    }

    fn fold(
        &self,
        job_id: &str,
        stage: usize,
        kind: StageKind,
        reporter: Option<common::WorkerAddress>,
        partition: u32,
        files: &BTreeMap<u32, Vec<FileRef>>,
    ) -> Option<JobStatus> {
        let Some(handle) = self.live(job_id) else {
            warn!("reporte de {:?} para el job {} que no está vivo", kind, job_id);
            return None;
        };
        let mut job = lock(&handle);

        let Some(worker) = reporter else {
            warn!("reporte de {:?} del job {} sin worker", kind, job_id);
            return Some(job.status);
        };

        let current = job.context.current_stage().map(|s| s.kind);
        if job.status != JobStatus::Suspended || job.context.pc != stage || current != Some(kind) {
            debug!(
                "reporte de {:?} viejo para el job {} (etapa {}, actual {})",
                kind, job_id, stage, job.context.pc
            );
            return Some(job.status);
        }

        let slot = TaskSlot { worker, partition };
        let ctx = &mut job.context;
        let (expected, finished, target) = match kind {
            StageKind::Map => (
                &ctx.mapper,
                &mut ctx.finished_mapper,
                &mut ctx.map_intermediate_files,
            ),
            StageKind::Reduce => (
                &ctx.reducer,
                &mut ctx.finished_reducer,
                &mut ctx.reduce_result_files,
            ),
        };

        if !expected.contains(&slot) {
            warn!("reporte no esperado de {} para el job {}: {:?}", slot.worker, job_id, slot);
            return Some(job.status);
        }
        if !finished.insert(slot) {
            debug!("reporte repetido para el job {}", job_id);
            return Some(job.status);
        }
        merge_files(target, files);

        if job.context.current_stage_done() {
            info!("todos los {:?} del job {} terminaron", kind, job_id);
            job.status = JobStatus::Running;
        }
        Some(job.status)
    }
}

/// Reloj de la máquina de estados. El tick corre fuera del runtime porque
/// toma locks bloqueantes y escribe a disco.
pub async fn run_tick_loop(tracker: Arc<JobTracker>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let t = tracker.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || t.tick()).await {
            error!("tick abortado: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compiler::DagCompiler;
    use crate::connection::{Outbound, Peer};
    use crate::namespace::LocalNamespace;
    use crate::store::{tests::temp_dir, FsJobStore};
    use common::{decode, Dag, DagNode, WorkerAddress};
    use tokio::sync::mpsc;

    pub(crate) fn addr(host: &str) -> WorkerAddress {
        WorkerAddress::new(host, 7000)
    }

    pub(crate) fn program(id: &str, file: Option<&str>) -> UserProgram {
        let mut nodes = Vec::new();
        if let Some(path) = file {
            nodes.push(DagNode {
                id: "read".into(),
                op: "read_text".into(),
                path: Some(path.into()),
                fn_name: None,
                key: None,
            });
        }
        nodes.push(DagNode {
            id: "m".into(),
            op: "map".into(),
            path: None,
            fn_name: Some("tokenize".into()),
            key: None,
        });
        nodes.push(DagNode {
            id: "r".into(),
            op: "reduce_by_key".into(),
            path: None,
            fn_name: Some("sum".into()),
            key: Some("token".into()),
        });
        UserProgram {
            id: id.into(),
            content: serde_json::to_string(&Dag {
                nodes,
                edges: vec![],
            })
            .unwrap(),
        }
    }

    pub(crate) struct Fixture {
        pub tracker: JobTracker,
        pub pool: Arc<ConnectionPool>,
        pub namespace: Arc<LocalNamespace>,
        pub store: Arc<FsJobStore>,
    }

    pub(crate) fn fixture(name: &str, workers: Vec<WorkerAddress>, max_attempts: u32) -> Fixture {
        let root = temp_dir(name);
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = Arc::new(ConnectionPool::new(
            workers.clone(),
            tx,
            Duration::from_millis(50),
            Duration::from_millis(400),
            Duration::from_millis(200),
        ));
        let namespace = Arc::new(LocalNamespace::open(&root, workers, 100, 2).unwrap());
        let store = Arc::new(FsJobStore::open(&root).unwrap());
        let tracker = JobTracker::new(
            pool.clone(),
            namespace.clone(),
            Arc::new(DagCompiler),
            store.clone(),
            max_attempts,
        );
        Fixture {
            tracker,
            pool,
            namespace,
            store,
        }
    }

    pub(crate) fn attach(pool: &ConnectionPool, a: &WorkerAddress) -> mpsc::UnboundedReceiver<Outbound> {
        let (peer, rx) = Peer::detached(&a.host, Some(a.clone()));
        pool.install(a, peer);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(o) = rx.try_recv() {
            out.push(decode(&o.frame).unwrap());
        }
        out
    }

    fn files(host: &str, entries: &[(u32, &str)]) -> BTreeMap<u32, Vec<FileRef>> {
        let mut map: BTreeMap<u32, Vec<FileRef>> = BTreeMap::new();
        for (partition, file) in entries {
            map.entry(*partition).or_default().push(FileRef {
                server: addr(host),
                file: file.to_string(),
            });
        }
        map
    }

    fn map_report(job: &str, stage: usize, host: &str, partition: u32, out: BTreeMap<u32, Vec<FileRef>>) -> MapPacket {
        MapPacket {
            job_id: job.into(),
            stage,
            function: "tokenize".into(),
            input_file: "/data/in.txt".into(),
            partition,
            reporter: Some(addr(host)),
            intermediate_files: out,
        }
    }

    fn reduce_report(job: &str, stage: usize, slot: &TaskSlot, out: BTreeMap<u32, Vec<FileRef>>) -> ReducePacket {
        ReducePacket {
            job_id: job.into(),
            stage,
            function: "sum".into(),
            partition: slot.partition,
            files: vec![],
            reporter: Some(slot.worker.clone()),
            result_files: out,
        }
    }

    fn status(f: &Fixture, id: &str) -> JobStatus {
        f.tracker.snapshot(id).unwrap().status
    }

    #[test]
    fn map_y_reduce_sobre_dos_particiones() {
        let (a, b) = (addr("a"), addr("b"));
        let f = fixture("tracker_scenario", vec![a.clone(), b.clone()], 3);
        let mut ra = attach(&f.pool, &a);
        let mut rb = attach(&f.pool, &b);
        f.namespace.create_or_get("/data/in.txt", 200).unwrap();

        assert_eq!(f.tracker.start_job(&program("job-1", Some("/data/in.txt"))), JobStatus::Init);

        f.tracker.tick();
        assert_eq!(status(&f, "job-1"), JobStatus::Running);

        // etapa 1: map sobre las dos particiones
        f.tracker.tick();
        let job = f.tracker.snapshot("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Suspended);
        assert_eq!(job.context.pc, 1);
        assert_eq!(job.context.mapper.len(), 2);

        let mut sent = drain(&mut ra);
        sent.extend(drain(&mut rb));
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| matches!(m, Message::DoMap(p) if p.stage == 1)));

        let slots: Vec<TaskSlot> = job.context.mapper.iter().cloned().collect();
        let first = map_report("job-1", 1, &slots[0].worker.host, slots[0].partition, files("a", &[(0, "i-0-0"), (1, "i-0-1")]));
        assert_eq!(f.tracker.map_finished(&first), Some(JobStatus::Suspended));

        // repetido: no cuenta dos veces
        assert_eq!(f.tracker.map_finished(&first), Some(JobStatus::Suspended));

        // reporte de un slot no asignado: se ignora
        let intruso = map_report("job-1", 1, "c", slots[1].partition, files("c", &[(0, "x")]));
        assert_eq!(f.tracker.map_finished(&intruso), Some(JobStatus::Suspended));

        let second = map_report("job-1", 1, &slots[1].worker.host, slots[1].partition, files("b", &[(0, "i-1-0"), (1, "i-1-1")]));
        assert_eq!(f.tracker.map_finished(&second), Some(JobStatus::Running));

        let job = f.tracker.snapshot("job-1").unwrap();
        assert_eq!(job.context.pc, 1);
        assert_eq!(job.context.map_intermediate_files[&0].len(), 2);
        assert_eq!(job.context.map_intermediate_files[&1].len(), 2);
        assert!(job.context.finished_mapper.is_subset(&job.context.mapper));

        // etapa 2: un reduce por partición intermedia
        f.tracker.tick();
        let job = f.tracker.snapshot("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Suspended);
        assert_eq!(job.context.pc, 2);
        assert_eq!(job.context.reducer.len(), 2);

        let mut sent = drain(&mut ra);
        sent.extend(drain(&mut rb));
        let reduces: Vec<_> = sent
            .into_iter()
            .filter_map(|m| match m {
                Message::DoReduce(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(reduces.len(), 2);
        assert!(reduces.iter().all(|p| p.files.len() == 2));

        let slots: Vec<TaskSlot> = job.context.reducer.iter().cloned().collect();
        for (i, slot) in slots.iter().enumerate() {
            let name = format!("r-{i}");
            let out = files(&slot.worker.host, &[(slot.partition, name.as_str())]);
            f.tracker.reduce_finished(&reduce_report("job-1", 2, slot, out));
        }
        assert_eq!(status(&f, "job-1"), JobStatus::Running);

        f.tracker.tick();
        assert_eq!(status(&f, "job-1"), JobStatus::Finished);

        // un tick más y sale de la tabla, pero el registro durable queda
        f.tracker.tick();
        assert!(f.tracker.snapshot("job-1").is_none());
        let stored = f.tracker.get_job("job-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.context.expected_result_count(), 2);
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn pc_nunca_supera_la_cantidad_de_etapas() {
        let a = addr("a");
        let f = fixture("tracker_pc", vec![a.clone()], 3);
        let _ra = attach(&f.pool, &a);
        // archivo vacío: cero particiones, las etapas no esperan reportes
        f.namespace.create_or_get("/vacio", 0).unwrap();
        f.tracker.start_job(&program("job-pc", Some("/vacio")));

        let mut last_pc = 0;
        for _ in 0..6 {
            f.tracker.tick();
            if let Some(job) = f.tracker.snapshot("job-pc") {
                assert!(job.context.pc >= last_pc);
                assert!(job.context.pc <= job.context.stages.len());
                last_pc = job.context.pc;
            }
        }
        let stored = f.store.read("job-pc").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.context.pc, 2);
    }

    #[test]
    fn programa_sin_archivo_falla() {
        let f = fixture("tracker_missing", vec![addr("a")], 3);
        assert_eq!(f.tracker.start_job(&program("job-m", None)), JobStatus::Failed);

        let stored = f.tracker.get_job("job-m").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.context.failure.is_some());

        f.tracker.tick();
        assert!(f.tracker.snapshot("job-m").is_none());
        assert_eq!(f.tracker.get_job("job-m").unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn archivo_inexistente_falla() {
        let f = fixture("tracker_nofile", vec![addr("a")], 3);
        let status = f.tracker.start_job(&program("job-n", Some("/no/existe")));
        assert_eq!(status, JobStatus::Failed);
    }

    #[test]
    fn programa_invalido_falla() {
        let f = fixture("tracker_invalid", vec![addr("a")], 3);
        let bad = UserProgram {
            id: "job-x".into(),
            content: "esto no es un dag".into(),
        };
        assert_eq!(f.tracker.start_job(&bad), JobStatus::Failed);
    }

    #[test]
    fn particion_sin_worker_se_reintenta_y_luego_falla() {
        let a = addr("a");
        let f = fixture("tracker_retry_fail", vec![a.clone()], 3);
        f.namespace.create_or_get("/data/in.txt", 150).unwrap();
        f.tracker.start_job(&program("job-r", Some("/data/in.txt")));

        f.tracker.tick(); // Running
        f.tracker.tick(); // map sin workers: intento 1
        let job = f.tracker.snapshot("job-r").unwrap();
        assert_eq!(job.status, JobStatus::Suspended);
        assert_eq!(job.context.pending_partitions, vec![0, 1]);
        assert_eq!(job.context.dispatch_attempts, 1);

        f.tracker.tick(); // intento 2
        f.tracker.tick(); // intento 3: falla
        let job = f.tracker.snapshot("job-r").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.context.failure.unwrap().contains("job-r"));

        f.tracker.tick();
        assert!(f.tracker.snapshot("job-r").is_none());
    }

    #[test]
    fn particion_pendiente_se_despacha_cuando_vuelve_el_worker() {
        let a = addr("a");
        let f = fixture("tracker_retry_ok", vec![a.clone()], 5);
        f.namespace.create_or_get("/data/in.txt", 150).unwrap();
        f.tracker.start_job(&program("job-v", Some("/data/in.txt")));

        f.tracker.tick();
        f.tracker.tick();
        assert_eq!(f.tracker.snapshot("job-v").unwrap().context.pending_partitions.len(), 2);

        let mut ra = attach(&f.pool, &a);
        f.tracker.tick();

        let job = f.tracker.snapshot("job-v").unwrap();
        assert_eq!(job.status, JobStatus::Suspended);
        assert!(job.context.pending_partitions.is_empty());
        assert_eq!(job.context.mapper.len(), 2);
        assert_eq!(drain(&mut ra).len(), 2);
    }

    #[test]
    fn reporte_de_etapa_vieja_no_avanza() {
        let a = addr("a");
        let f = fixture("tracker_stale", vec![a.clone()], 3);
        let _ra = attach(&f.pool, &a);
        f.namespace.create_or_get("/data/in.txt", 50).unwrap();
        f.tracker.start_job(&program("job-s", Some("/data/in.txt")));
        f.tracker.tick();
        f.tracker.tick();

        let stale = map_report("job-s", 7, "a", 0, BTreeMap::new());
        assert_eq!(f.tracker.map_finished(&stale), Some(JobStatus::Suspended));
        assert!(f.tracker.snapshot("job-s").unwrap().context.finished_mapper.is_empty());

        let ok = map_report("job-s", 1, "a", 0, BTreeMap::new());
        assert_eq!(f.tracker.map_finished(&ok), Some(JobStatus::Running));
        // ya avanzó: repetirlo no cambia nada
        assert_eq!(f.tracker.map_finished(&ok), Some(JobStatus::Running));
        assert_eq!(f.tracker.snapshot("job-s").unwrap().context.pc, 1);
    }

    #[test]
    fn tarea_de_worker_caido_se_vuelve_a_despachar() {
        let a = addr("a");
        let f = fixture("tracker_requeue", vec![a.clone()], 3);
        let mut ra = attach(&f.pool, &a);
        f.namespace.create_or_get("/data/in.txt", 50).unwrap();
        f.tracker.start_job(&program("job-w", Some("/data/in.txt")));
        f.tracker.tick();
        f.tracker.tick();
        assert_eq!(drain(&mut ra).len(), 1);

        // la conexión se cae con el map en vuelo
        f.pool.release(&a);
        assert_eq!(f.tracker.requeue_worker(&a), 1);
        let job = f.tracker.snapshot("job-w").unwrap();
        assert_eq!(job.context.pending_partitions, vec![0]);
        assert!(job.context.mapper.is_empty());

        // un reporte tardío de la tarea perdida no completa la etapa
        let late = map_report("job-w", 1, "a", 0, BTreeMap::new());
        assert_eq!(f.tracker.map_finished(&late), Some(JobStatus::Suspended));

        let mut ra = attach(&f.pool, &a);
        f.tracker.tick();
        let sent = drain(&mut ra);
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Message::DoMap(p) if p.partition == 0 && p.stage == 1));

        let job = f.tracker.snapshot("job-w").unwrap();
        assert!(job.context.pending_partitions.is_empty());
        assert_eq!(job.context.mapper.len(), 1);

        let ok = map_report("job-w", 1, "a", 0, files("a", &[(0, "i-0")]));
        assert_eq!(f.tracker.map_finished(&ok), Some(JobStatus::Running));
    }

    #[test]
    fn reencolar_no_toca_tareas_ya_reportadas() {
        let a = addr("a");
        let f = fixture("tracker_requeue_done", vec![a.clone()], 3);
        let _ra = attach(&f.pool, &a);
        f.namespace.create_or_get("/data/in.txt", 200).unwrap();
        f.tracker.start_job(&program("job-d", Some("/data/in.txt")));
        f.tracker.tick();
        f.tracker.tick();
        assert_eq!(f.tracker.snapshot("job-d").unwrap().context.mapper.len(), 2);

        let report = map_report("job-d", 1, "a", 0, BTreeMap::new());
        assert_eq!(f.tracker.map_finished(&report), Some(JobStatus::Suspended));

        assert_eq!(f.tracker.requeue_worker(&a), 1);
        let job = f.tracker.snapshot("job-d").unwrap();
        assert_eq!(job.context.pending_partitions, vec![1]);
        assert_eq!(job.context.finished_mapper.len(), 1);
        // ya no queda nada de `a` en vuelo
        assert_eq!(f.tracker.requeue_worker(&a), 0);
    }

    #[test]
    fn reporte_de_job_desconocido_se_ignora() {
        let f = fixture("tracker_unknown", vec![addr("a")], 3);
        let report = map_report("fantasma", 1, "a", 0, BTreeMap::new());
        assert_eq!(f.tracker.map_finished(&report), None);
    }
}
