use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::rc::Rc;

use tempdir::TempDir;

use crate::cache::CompletionCache;
use crate::config::Config;
use crate::control::SpoolContext;
use crate::scheduler::{SchedResult, Scheduler, SubmitRequest, SubmitStatus};
use crate::spool::ArraySpec;
use crate::suite::shell::ShellSuite;

/// Scripted stand-in for the LSF adapter: records every accepted
/// submission, serves canned queue depths and running counts, and can
/// play the part of a closed or failing queue.
pub(crate) struct StubState {
    pub submits: Vec<SubmitRequest>,
    pub running: HashMap<String, u32>,
    /// Depths served in order; when exhausted, `default_depth` repeats.
    pub depths: VecDeque<Option<u32>>,
    pub default_depth: Option<u32>,
    pub queue_closed: bool,
    pub fail_submit: bool,
    /// Create the output files a real scheduler job would have produced.
    pub materialize_outputs: bool,
    next_jobid: u64,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            submits: Vec::new(),
            running: HashMap::new(),
            depths: VecDeque::new(),
            default_depth: Some(0),
            queue_closed: false,
            fail_submit: false,
            materialize_outputs: false,
            next_jobid: 1000,
        }
    }
}

pub(crate) struct StubScheduler {
    pub state: Rc<RefCell<StubState>>,
}

impl Scheduler for StubScheduler {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = SchedResult<SubmitStatus>>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.borrow_mut();
            if state.fail_submit {
                return Err(anyhow::anyhow!("bsub exited with 1"));
            }
            if state.queue_closed {
                return Ok(SubmitStatus::QueueClosed);
            }
            if state.materialize_outputs {
                write_outputs(&request);
            }
            state.submits.push(request);
            state.next_jobid += 1;
            Ok(SubmitStatus::Submitted(state.next_jobid))
        })
    }

    fn running_count(&self, job_name: String) -> Pin<Box<dyn Future<Output = SchedResult<u32>>>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(state.borrow().running.get(&job_name).copied().unwrap_or(0))
        })
    }

    fn queue_depth(&self) -> Pin<Box<dyn Future<Output = SchedResult<Option<u32>>>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.borrow_mut();
            match state.depths.pop_front() {
                Some(depth) => Ok(depth),
                None => Ok(state.default_depth),
            }
        })
    }
}

fn write_outputs(request: &SubmitRequest) {
    let write = |name: String| {
        let mut file = File::create(request.unit_dir.join(name)).unwrap();
        file.write_all(b"done\n").unwrap();
    };
    match &request.array {
        ArraySpec::Range { unit, count } => {
            for i in 1..=*count {
                write(format!("{unit}-{i}-output"));
            }
        }
        ArraySpec::Single { unit, index } => write(format!("{unit}-{index}-output")),
    }
}

pub(crate) fn test_config() -> Config {
    serde_yaml::from_str(
        r#"
queue: long
sleepval: 0
queueceiling: 100
queuefloor: 10
churnrate: 0
lsf_tries: 0
db_tries: 1
suite:
  name: shell
  parameters: "run %{INPUT} > %{OUTPUT}"
"#,
    )
    .unwrap()
}

/// A spool unit on disk: `root/name` with inputs `name-<i>` and, for each
/// listed output index, a non-empty `name-<i>-output`.
pub(crate) fn make_unit(
    root: impl AsRef<Path>,
    name: &str,
    inputs: &[u32],
    outputs: &[u32],
) -> PathBuf {
    let dir = root.as_ref().join(name);
    fs::create_dir(&dir).unwrap();
    for i in inputs {
        File::create(dir.join(format!("{name}-{i}"))).unwrap();
    }
    for i in outputs {
        let mut file = File::create(dir.join(format!("{name}-{i}-output"))).unwrap();
        file.write_all(b"done\n").unwrap();
    }
    dir
}

/// Fully wired context over a temporary spool tree and cache, with the
/// stub scheduler's state exposed for scripting and assertions.
pub(crate) struct Harness {
    pub tmp: TempDir,
    pub ctx: SpoolContext,
    pub state: Rc<RefCell<StubState>>,
}

impl Harness {
    pub fn new() -> Harness {
        let tmp = TempDir::new("bspool").unwrap();
        let spool = tmp.path().join("spool");
        fs::create_dir(&spool).unwrap();
        let logs_dir = tmp.path().join("spool.logs");
        fs::create_dir(&logs_dir).unwrap();
        let cache = CompletionCache::open(&tmp.path().join("spool.cache"), 1).unwrap();

        let state = Rc::new(RefCell::new(StubState::default()));
        let ctx = SpoolContext {
            config: test_config(),
            scheduler: Box::new(StubScheduler {
                state: state.clone(),
            }),
            suite: Box::new(ShellSuite::new("run %{INPUT} > %{OUTPUT}").unwrap()),
            cache,
            logs_dir,
            wait: false,
            high_priority: false,
        };
        Harness { tmp, ctx, state }
    }

    pub fn spool(&self) -> PathBuf {
        self.tmp.path().join("spool")
    }

    /// Array specs of the accepted submissions, in order.
    pub fn submits(&self) -> Vec<String> {
        self.state
            .borrow()
            .submits
            .iter()
            .map(|r| r.array.to_string())
            .collect()
    }
}
