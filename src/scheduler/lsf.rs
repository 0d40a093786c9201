use std::future::Future;
use std::pin::Pin;
use std::process::Output;
use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;
use tokio::process::Command;

use crate::config::Config;
use crate::scheduler::{SchedResult, Scheduler, SubmitRequest, SubmitStatus};

const BSUB: &str = "bsub";
const BJOBS: &str = "bjobs";
const BQUEUES: &str = "bqueues";

/// Exit status bsub uses when the queue refuses new jobs.
const QUEUE_CLOSED_EXIT: i32 = 255;

/// Column of `bqueues` output holding the job count (1-based, after
/// whitespace split): QUEUE_NAME PRIO STATUS MAX JL/U JL/P JL/H NJOBS ...
const BQUEUES_NJOBS_FIELD: usize = 8;

pub struct LsfScheduler {
    queue: String,
    user: Option<String>,
    email: Option<String>,
    bsubargs: Option<String>,
    dry_run: bool,
}

impl LsfScheduler {
    pub fn new(config: &Config, dry_run: bool) -> Self {
        Self {
            queue: config.queue.clone(),
            user: config.user.clone(),
            email: config.email.clone(),
            bsubargs: config.bsubargs.clone(),
            dry_run,
        }
    }

    /// Assembles the bsub argv. The fragment order is fixed: options that
    /// change submission semantics first, then queue and array naming,
    /// then the post-exec relocation and log routing, and the workload
    /// command last.
    fn build_bsub_args(&self, request: &SubmitRequest) -> Vec<String> {
        let mut args = Vec::new();
        if request.wait {
            args.push("-K".to_string());
        }
        if request.high_priority {
            args.push("-sp".to_string());
            args.push("300".to_string());
        }
        if let Some(email) = &self.email {
            args.push("-u".to_string());
            args.push(email.clone());
        }
        if let Some(extra) = &self.bsubargs {
            args.extend(extra.split_whitespace().map(|s| s.to_string()));
        }
        args.push("-q".to_string());
        args.push(self.queue.clone());
        args.push("-J".to_string());
        args.push(request.array.to_string());
        args.push("-Ep".to_string());
        args.push(format!(
            "mv /tmp/{}-output {}",
            request.array.input_token(),
            request.unit_dir.display()
        ));
        args.push("-e".to_string());
        args.push(format!(
            "{}/{}.%I.%J.err",
            request.logs_dir.display(),
            request.array
        ));
        args.push("-o".to_string());
        args.push(format!(
            "{}/{}.%I.%J.out",
            request.logs_dir.display(),
            request.array
        ));
        args.push(request.command.clone());
        args
    }
}

impl Scheduler for LsfScheduler {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = SchedResult<SubmitStatus>>>> {
        let args = self.build_bsub_args(&request);
        let dry_run = self.dry_run;
        let unit_dir = request.unit_dir;

        Box::pin(async move {
            if dry_run {
                log::info!("dry run: {} {}", BSUB, args.join(" "));
                return Ok(SubmitStatus::Submitted(0));
            }

            log::debug!("Running command `{} {}`", BSUB, args.join(" "));
            let output = Command::new(BSUB)
                .args(&args)
                .current_dir(&unit_dir)
                .output()
                .await
                .context("bsub start failed")?;

            if output.status.code() == Some(QUEUE_CLOSED_EXIT) {
                log::warn!(
                    "Queue refused submission: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return Ok(SubmitStatus::QueueClosed);
            }
            let output = check_command_output(output).context("bsub execution failed")?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            let jobid = parse_bsub_jobid(&stdout)
                .ok_or_else(|| anyhow::anyhow!("Missing job id in bsub output\n{stdout}"))?;
            Ok(SubmitStatus::Submitted(jobid))
        })
    }

    fn running_count(&self, job_name: String) -> Pin<Box<dyn Future<Output = SchedResult<u32>>>> {
        Box::pin(async move {
            log::debug!("Running command `{BJOBS} -J {job_name}`");
            let output = Command::new(BJOBS)
                .arg("-J")
                .arg(&job_name)
                .output()
                .await
                .context("bjobs start failed")?;

            // bjobs reports "no matching job" through its exit status.
            if !output.status.success() {
                log::debug!(
                    "bjobs found nothing for {job_name}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return Ok(0);
            }
            Ok(count_job_lines(&String::from_utf8_lossy(&output.stdout)))
        })
    }

    fn queue_depth(&self) -> Pin<Box<dyn Future<Output = SchedResult<Option<u32>>>>> {
        let queue = self.queue.clone();
        let user = self.user.clone();

        Box::pin(async move {
            match user {
                Some(user) => {
                    log::debug!("Running command `{BJOBS} -u {user} -q {queue}`");
                    let output = Command::new(BJOBS)
                        .args(["-u", user.as_str(), "-q", queue.as_str()])
                        .output()
                        .await
                        .context("bjobs start failed")?;
                    if !output.status.success() {
                        log::warn!(
                            "bjobs -u exited with {}: {}",
                            output.status.code().unwrap_or(-1),
                            String::from_utf8_lossy(&output.stderr).trim()
                        );
                        return Ok(None);
                    }
                    Ok(Some(count_job_lines(&String::from_utf8_lossy(
                        &output.stdout,
                    ))))
                }
                None => {
                    log::debug!("Running command `{BQUEUES} {queue}`");
                    let output = Command::new(BQUEUES)
                        .arg(&queue)
                        .output()
                        .await
                        .context("bqueues start failed")?;
                    if !output.status.success() {
                        log::warn!(
                            "bqueues exited with {}: {}",
                            output.status.code().unwrap_or(-1),
                            String::from_utf8_lossy(&output.stderr).trim()
                        );
                        return Ok(None);
                    }
                    let depth =
                        parse_bqueues_depth(&String::from_utf8_lossy(&output.stdout), &queue);
                    if depth.is_none() {
                        log::warn!("Could not find queue {queue} in bqueues output");
                    }
                    Ok(depth)
                }
            }
        })
    }
}

fn check_command_output(output: Output) -> SchedResult<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim(),
            String::from_utf8_lossy(&output.stdout).trim()
        ));
    }
    Ok(output)
}

fn jobid_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"<(\d+)>").expect("invalid jobid regex"))
}

/// Job id from the first line of successful bsub output, e.g.
/// `Job <12345> is submitted to queue <long>.`
pub fn parse_bsub_jobid(output: &str) -> Option<u64> {
    let first = output.lines().next()?;
    jobid_rx()
        .captures(first)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Job count for a queue from `bqueues <queue>` output: the NJOBS column
/// of the line whose first token is the queue name.
pub fn parse_bqueues_depth(output: &str, queue: &str) -> Option<u32> {
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some(queue) {
            continue;
        }
        return fields.nth(BQUEUES_NJOBS_FIELD - 2).and_then(|f| f.parse().ok());
    }
    None
}

/// Data lines of bjobs output; the header starts with JOBID.
pub fn count_job_lines(output: &str) -> u32 {
    output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("JOBID"))
        .count() as u32
}
