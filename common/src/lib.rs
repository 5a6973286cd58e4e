pub mod dag;
pub mod job;
pub mod name;
pub mod packet;
pub mod protocol;

pub use dag::{Dag, DagNode};
pub use job::{
    merge_files, stage_satisfied, FileRef, Job, JobContext, JobId, JobStage, JobStatus,
    StageKind, TaskSlot,
};
pub use name::{NameItem, WorkerAddress};
pub use packet::{
    CreateRequest, DownloadRequest, FilePacket, JobResultQuery, JobStatusQuery, LsRequest,
    MapPacket, Message, ReducePacket, ReduceResultFetch, ResultToClient, RmPartition,
    UserProgram,
};
pub use protocol::{decode, encode, read_message, write_message, CodecError, FrameSplitter};
