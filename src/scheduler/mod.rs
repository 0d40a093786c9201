pub mod lsf;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::spool::ArraySpec;

pub type SchedResult<T> = anyhow::Result<T>;

/// Outcome of a submission attempt that ran to completion. A submission
/// that failed outright (non-zero exit other than the queue-closed status)
/// is an error on the result instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    Submitted(u64),
    /// The scheduler refused the job because the queue is closed; retried
    /// on a later sweep.
    QueueClosed,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub array: ArraySpec,
    /// Working directory of the launch; also where the post-exec step
    /// moves the produced output file.
    pub unit_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Suite-supplied command executed on the scheduler host.
    pub command: String,
    /// Block until the job finishes (`bsub -K`).
    pub wait: bool,
    /// Resubmission priority boost (`bsub -sp 300`).
    pub high_priority: bool,
}

/// Handler that can talk to some batch scheduler (the LSF family in
/// production; a recording stub in tests).
pub trait Scheduler {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = SchedResult<SubmitStatus>>>>;

    /// Number of scheduler jobs currently carrying `job_name`.
    fn running_count(&self, job_name: String) -> Pin<Box<dyn Future<Output = SchedResult<u32>>>>;

    /// Current depth of the configured queue; `None` when the scheduler's
    /// answer cannot be interpreted.
    fn queue_depth(&self) -> Pin<Box<dyn Future<Output = SchedResult<Option<u32>>>>>;
}
