use std::time::Duration;

use crate::cache::Completion;
use crate::control::validate::{inspect_unit, UnitHealth};
use crate::control::{now_epoch, Decision, SpoolContext};
use crate::scheduler::{Scheduler, SubmitRequest, SubmitStatus};
use crate::spool::{ArraySpec, SpoolUnit};
use crate::suite::Suite;

/// One decision pass over a spool unit.
///
/// The guards run in a fixed order. Churn comes before the running-job
/// check so the scheduler is not hammered; the running-job check comes
/// before filesystem validation so a unit is never declared complete
/// while its outputs are still being written; queue admission comes
/// before the retry cap so an operator watching a full queue sees that
/// rather than an exhausted cap; the stop flag is checked last, right
/// before submission.
pub async fn process_dir(
    ctx: &SpoolContext,
    unit: &SpoolUnit,
    build_only: bool,
) -> crate::Result<Decision> {
    let key = unit.path.as_path();

    if ctx.cache.completion(key)? == Some(Completion::Complete) {
        log::debug!("{} is already complete", unit.name);
        return Ok(Decision::AlreadyComplete);
    }

    let now = now_epoch();
    if let Some(stamp) = ctx.cache.time(key)? {
        if now.saturating_sub(stamp) < ctx.config.churnrate {
            log::debug!(
                "{} was visited {}s ago; napping",
                unit.name,
                now.saturating_sub(stamp)
            );
            nap(ctx).await;
            return Ok(Decision::Throttled);
        }
    }

    ctx.cache.touch_record(key)?;
    ctx.cache.set_time(key, now)?;

    let running = match ctx
        .scheduler
        .running_count(unit.job_name().to_string())
        .await
    {
        Ok(n) => n,
        Err(e) => {
            log::warn!("Could not count running jobs for {}: {e:?}", unit.name);
            return Ok(Decision::SchedulerFailed);
        }
    };
    if running > 0 {
        log::info!("{}: {running} job(s) still running", unit.name);
        return Ok(Decision::Running(running));
    }

    let (missing, total) = match inspect_unit(ctx.suite.as_ref(), unit)? {
        UnitHealth::NoInputs => {
            log::info!("{} has no input files", unit.name);
            return Ok(Decision::Empty);
        }
        UnitHealth::Complete => {
            ctx.cache.set_completion(key, Completion::Complete)?;
            log::info!("{} is complete", unit.name);
            return Ok(Decision::Completed);
        }
        UnitHealth::Incomplete { missing, total } => {
            ctx.cache.set_completion(key, Completion::Incomplete)?;
            if missing.len() == total {
                ctx.cache.set_files(key, &[])?;
            } else {
                ctx.cache.set_files(key, &missing)?;
            }
            (missing, total)
        }
    };

    if build_only {
        return Ok(Decision::CacheOnly);
    }

    if let Some(depth) = query_depth(ctx).await {
        if depth > ctx.config.queueceiling {
            log::info!(
                "queue {} holds {depth} jobs, above ceiling {}; waiting for {} jobs",
                ctx.config.queue,
                ctx.config.queueceiling,
                ctx.config.queuefloor
            );
            loop {
                nap(ctx).await;
                match query_depth(ctx).await {
                    Some(d) if d < ctx.config.queuefloor => break,
                    None => break,
                    Some(_) => continue,
                }
            }
            return Ok(Decision::QueueFull);
        }
    }

    let count = ctx.cache.count(key)?;
    if ctx.config.lsf_tries > 0 && count >= ctx.config.lsf_tries {
        ctx.cache.set_completion(key, Completion::Abandoned)?;
        log::warn!("giving up on {} after {count} submissions", unit.name);
        return Ok(Decision::Abandoned);
    }

    if let Some(flag) = &ctx.config.stopflag {
        if flag.exists() {
            log::info!(
                "stop flag {} present; withholding submission of {}",
                flag.display(),
                unit.name
            );
            ctx.cache.set_time(key, now_epoch())?;
            return Ok(Decision::Halted);
        }
    }

    // A partial unit resubmits only the inputs that still lack output;
    // a unit with nothing done yet goes out as one whole job array.
    let targets: Vec<ArraySpec> = if missing.len() < total {
        missing
            .iter()
            .map(|name| ArraySpec::for_input(&unit.name, name))
            .collect::<crate::Result<_>>()?
    } else {
        vec![ArraySpec::whole_unit(&unit.name, total as u32)?]
    };

    let mut submitted = 0;
    let mut queue_closed = false;
    for array in targets {
        let command = ctx.suite.action(&unit.path, &array.input_token());
        let request = SubmitRequest {
            array: array.clone(),
            unit_dir: unit.path.clone(),
            logs_dir: ctx.logs_dir.clone(),
            command,
            wait: ctx.wait,
            high_priority: ctx.high_priority,
        };
        match ctx.scheduler.submit(request).await {
            Ok(SubmitStatus::Submitted(jobid)) => {
                log::info!("submitted {array} as job {jobid}");
                ctx.cache.set_time(key, now_epoch())?;
                ctx.cache.counter(key)?;
                submitted += 1;
            }
            Ok(SubmitStatus::QueueClosed) => {
                log::warn!("queue closed while submitting {array}; will retry");
                queue_closed = true;
                break;
            }
            Err(e) => {
                log::error!("failed to submit {array}: {e:?}");
            }
        }
    }

    if submitted > 0 {
        Ok(Decision::Submitted(submitted))
    } else if queue_closed {
        Ok(Decision::QueueClosed)
    } else {
        Ok(Decision::SchedulerFailed)
    }
}

async fn query_depth(ctx: &SpoolContext) -> Option<u32> {
    match ctx.scheduler.queue_depth().await {
        Ok(depth) => depth,
        Err(e) => {
            log::warn!("Could not determine queue depth: {e:?}");
            None
        }
    }
}

async fn nap(ctx: &SpoolContext) {
    tokio::time::sleep(Duration::from_secs(ctx.config.sleepval)).await;
}
