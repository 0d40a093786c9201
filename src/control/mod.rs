pub mod decider;
pub mod sweep;
pub mod validate;

use std::path::PathBuf;

use crate::cache::CompletionCache;
use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::suite::Suite;

/// Everything a decision pass needs, threaded explicitly instead of
/// living in globals.
pub struct SpoolContext {
    pub config: Config,
    pub scheduler: Box<dyn Scheduler>,
    pub suite: Box<dyn Suite>,
    pub cache: CompletionCache,
    pub logs_dir: PathBuf,
    /// Submissions block until the job finishes (`bsub -K`).
    pub wait: bool,
    /// Resubmissions carry a priority boost (`bsub -sp 300`).
    pub high_priority: bool,
}

/// Outcome of one decision pass over a spool unit. The decider applies
/// its guards in a fixed order and reports which one ended the pass; the
/// sweep engine and the tests read the policy off this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Cache already records the unit as complete.
    AlreadyComplete,
    /// Visited again within the churn window; slept instead.
    Throttled,
    /// The scheduler still runs this many jobs for the unit.
    Running(u32),
    /// The unit has no input files.
    Empty,
    /// Every output checked out on disk; recorded as complete.
    Completed,
    /// Cache-population pass ended before any scheduler contact.
    CacheOnly,
    /// Queue was over the ceiling; waited for it to drain.
    QueueFull,
    /// Retry cap reached; recorded as abandoned.
    Abandoned,
    /// Stop flag present; submission withheld.
    Halted,
    /// This many jobs were handed to the scheduler.
    Submitted(u32),
    /// The queue refused new jobs; retried next sweep.
    QueueClosed,
    /// A scheduler call failed; retried next sweep.
    SchedulerFailed,
}

pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
