use std::path::{Path, PathBuf};

use crate::cache::Completion;
use crate::control::{decider, SpoolContext};
use crate::spool::{self, SpoolUnit};

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Skip units until this one is seen.
    pub startpos: Option<String>,
    /// Stop after processing this unit.
    pub endpos: Option<String>,
    /// Populate the cache without contacting the scheduler.
    pub build_only: bool,
}

/// First contact with a spool tree: creates the logs directory and runs
/// the decider once for every unit the cache has not seen yet.
pub async fn build_cache(
    ctx: &SpoolContext,
    root: &Path,
    opts: &SweepOptions,
) -> crate::Result<()> {
    std::fs::create_dir_all(&ctx.logs_dir)?;

    let units = spool::discover_units(root)?;
    let mut started = opts.startpos.is_none();
    for unit in units {
        if !started {
            if Some(&unit.name) == opts.startpos.as_ref() {
                started = true;
            } else {
                continue;
            }
        }
        if !ctx.cache.contains(&unit.path)? {
            let decision = decider::process_dir(ctx, &unit, opts.build_only).await?;
            log::debug!("build pass over {}: {:?}", unit.name, decision);
        }
        if Some(&unit.name) == opts.endpos.as_ref() {
            break;
        }
    }
    Ok(())
}

/// Drives the decider until no incomplete unit remains, then returns the
/// units that were abandoned along the way.
///
/// Each round re-reads the cache, so units completed or abandoned by
/// earlier passes drop out; the incomplete set shrinks toward empty
/// unless the scheduler keeps failing. `max_sweeps` bounds that worst
/// case when configured.
pub async fn process_cache(ctx: &SpoolContext) -> crate::Result<Vec<PathBuf>> {
    let mut sweeps = 0u32;
    loop {
        let mut dirs = ctx.cache.fetch_complete(Completion::Incomplete)?;
        if dirs.is_empty() {
            break;
        }
        spool::sort_by_index(&mut dirs);

        sweeps += 1;
        log::info!("sweep {sweeps}: {} incomplete unit(s)", dirs.len());
        for dir in &dirs {
            let unit = SpoolUnit::from_dir(dir)?;
            let decision = decider::process_dir(ctx, &unit, false).await?;
            log::debug!("{}: {:?}", unit.name, decision);
        }

        if let Some(max) = ctx.config.max_sweeps {
            if sweeps >= max {
                log::warn!("stopping after {sweeps} sweep(s) with incomplete units remaining");
                break;
            }
        }
    }
    ctx.cache.fetch_complete(Completion::Abandoned)
}
