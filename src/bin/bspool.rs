use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use bspool::cache::CompletionCache;
use bspool::common::error::{error, SpoolError};
use bspool::common::fsutils::{absolute_path, default_cache_path, logs_dir};
use bspool::common::setup::setup_logging;
use bspool::config::Config;
use bspool::control::sweep::{build_cache, process_cache, SweepOptions};
use bspool::control::validate::{validate_spool, UnitHealth};
use bspool::control::{decider, SpoolContext};
use bspool::scheduler::lsf::LsfScheduler;
use bspool::scheduler::{Scheduler, SubmitRequest, SubmitStatus};
use bspool::spool::{ArraySpec, SpoolUnit};
use bspool::suite::Suite;
use bspool::{suite, BSPOOL_VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "bspool",
    version = BSPOOL_VERSION,
    about = "Feeds spools of input files through an LSF cluster until every input has a valid output"
)]
struct RootOptions {
    /// Configuration file
    #[arg(short = 'C', value_name = "FILE")]
    config: PathBuf,

    /// Build-only sweep: populate the cache, do not submit
    #[arg(short = 'b', group = "action")]
    build: bool,

    /// Report the running-job count for each argument
    #[arg(short = 'c', group = "action")]
    count: bool,

    /// Debug logging
    #[arg(short = 'd')]
    debug: bool,

    /// End after this spool unit
    #[arg(short = 'E', value_name = "SUBDIR")]
    endpos: Option<String>,

    /// Cache file (default: <spoolroot>.cache)
    #[arg(short = 'i', value_name = "FILE")]
    cachefile: Option<PathBuf>,

    /// Log file (default: from the config, else stderr)
    #[arg(short = 'l', value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Dry run: log the submit command instead of executing it
    #[arg(short = 'n')]
    dry_run: bool,

    /// Full process: build the cache, then sweep until terminal
    #[arg(short = 'p', value_name = "DIR", group = "action")]
    process: Option<PathBuf>,

    /// Resubmit with high priority
    #[arg(short = 'r')]
    high_priority: bool,

    /// Single-shot submit of the arguments
    #[arg(short = 's', group = "action")]
    submit: bool,

    /// Start at this spool unit
    #[arg(short = 'S', value_name = "SUBDIR")]
    startpos: Option<String>,

    /// Validate only
    #[arg(short = 'v', group = "action")]
    validate: bool,

    /// Alone: wait for the arguments' running jobs to drain.
    /// With -s: submit blocking (bsub -K)
    #[arg(short = 'w')]
    wait: bool,

    /// Spool directories or input files
    #[arg(value_name = "PATH")]
    args: Vec<PathBuf>,
}

enum Action {
    Build,
    Count,
    Process(PathBuf),
    Submit,
    Validate,
    Wait,
}

fn resolve_action(opts: &RootOptions) -> bspool::Result<Action> {
    if opts.build {
        Ok(Action::Build)
    } else if opts.count {
        Ok(Action::Count)
    } else if let Some(dir) = &opts.process {
        Ok(Action::Process(dir.clone()))
    } else if opts.submit {
        Ok(Action::Submit)
    } else if opts.validate {
        Ok(Action::Validate)
    } else if opts.wait {
        Ok(Action::Wait)
    } else {
        Err(SpoolError::ConfigError(
            "no action given; use one of -b, -c, -p, -s, -v, -w".to_string(),
        ))
    }
}

/// Canonicalized arguments, which must be uniformly files or uniformly
/// directories.
fn checked_args(opts: &RootOptions) -> bspool::Result<Vec<PathBuf>> {
    let mut args = Vec::with_capacity(opts.args.len());
    for arg in &opts.args {
        args.push(std::fs::canonicalize(arg)?);
    }
    let dirs = args.iter().filter(|p| p.is_dir()).count();
    if dirs != 0 && dirs != args.len() {
        return Err(SpoolError::ConfigError(
            "arguments must be uniformly files or uniformly directories".to_string(),
        ));
    }
    Ok(args)
}

fn make_context(
    config: &Config,
    opts: &RootOptions,
    root: &Path,
) -> bspool::Result<SpoolContext> {
    let cache_path = absolute_path(
        opts.cachefile
            .clone()
            .unwrap_or_else(|| default_cache_path(root)),
    );
    let cache = CompletionCache::open(&cache_path, config.db_tries)?;
    Ok(SpoolContext {
        config: config.clone(),
        scheduler: Box::new(LsfScheduler::new(config, opts.dry_run)),
        suite: suite::resolve(&config.suite)?,
        cache,
        logs_dir: logs_dir(root),
        wait: opts.wait,
        high_priority: opts.high_priority,
    })
}

/// The name jobs for this path carry: a directory is queried by its bare
/// unit name, a file by its one-element array.
fn job_name_for(path: &Path) -> bspool::Result<String> {
    if path.is_dir() {
        Ok(SpoolUnit::from_dir(path)?.name)
    } else {
        Ok(ArraySpec::for_file(path)?.to_string())
    }
}

async fn command_build(
    config: &Config,
    opts: &RootOptions,
    args: &[PathBuf],
) -> bspool::Result<()> {
    for root in args {
        let ctx = make_context(config, opts, root)?;
        let sweep_opts = SweepOptions {
            startpos: opts.startpos.clone(),
            endpos: opts.endpos.clone(),
            build_only: true,
        };
        build_cache(&ctx, root, &sweep_opts).await?;
    }
    Ok(())
}

async fn command_process(
    config: &Config,
    opts: &RootOptions,
    root: &Path,
) -> bspool::Result<()> {
    let root = std::fs::canonicalize(root)?;
    let ctx = make_context(config, opts, &root)?;
    let sweep_opts = SweepOptions {
        startpos: opts.startpos.clone(),
        endpos: opts.endpos.clone(),
        build_only: false,
    };
    build_cache(&ctx, &root, &sweep_opts).await?;
    let abandoned = process_cache(&ctx).await?;
    if abandoned.is_empty() {
        log::info!("{} is fully processed", root.display());
    } else {
        for unit in &abandoned {
            log::warn!(
                "gave up on {} after {} submission(s)",
                unit.display(),
                ctx.cache.count(unit)?
            );
        }
    }
    Ok(())
}

async fn command_count(
    config: &Config,
    opts: &RootOptions,
    args: &[PathBuf],
) -> bspool::Result<()> {
    let scheduler = LsfScheduler::new(config, opts.dry_run);
    for arg in args {
        let name = job_name_for(arg)?;
        let count = scheduler.running_count(name.clone()).await?;
        println!("{name} {count}");
    }
    Ok(())
}

async fn command_wait(
    config: &Config,
    opts: &RootOptions,
    args: &[PathBuf],
) -> bspool::Result<()> {
    let scheduler = LsfScheduler::new(config, opts.dry_run);
    for arg in args {
        let name = job_name_for(arg)?;
        loop {
            let count = scheduler.running_count(name.clone()).await?;
            if count == 0 {
                break;
            }
            log::info!("{name}: {count} job(s) still running");
            tokio::time::sleep(Duration::from_secs(config.sleepval)).await;
        }
    }
    Ok(())
}

async fn command_submit(
    config: &Config,
    opts: &RootOptions,
    args: &[PathBuf],
) -> bspool::Result<()> {
    for arg in args {
        if arg.is_dir() {
            let ctx = make_context(config, opts, arg)?;
            std::fs::create_dir_all(&ctx.logs_dir)?;
            let unit = SpoolUnit::from_dir(arg)?;
            let decision = decider::process_dir(&ctx, &unit, false).await?;
            log::info!("{}: {:?}", unit.name, decision);
        } else {
            submit_one_file(config, opts, arg).await?;
        }
    }
    Ok(())
}

/// Single-shot submission of one input file, with the same cache
/// bookkeeping a decider pass would do for its unit.
async fn submit_one_file(
    config: &Config,
    opts: &RootOptions,
    path: &Path,
) -> bspool::Result<()> {
    let unit_dir = path
        .parent()
        .ok_or_else(|| {
            SpoolError::StructuralError(format!("{} has no parent spool unit", path.display()))
        })?
        .to_path_buf();
    let ctx = make_context(config, opts, &unit_dir)?;
    std::fs::create_dir_all(&ctx.logs_dir)?;

    let array = ArraySpec::for_file(path)?;
    let command = ctx.suite.action(&unit_dir, &array.input_token());
    let request = SubmitRequest {
        array: array.clone(),
        unit_dir: unit_dir.clone(),
        logs_dir: ctx.logs_dir.clone(),
        command,
        wait: ctx.wait,
        high_priority: ctx.high_priority,
    };
    match ctx.scheduler.submit(request).await? {
        SubmitStatus::Submitted(jobid) => {
            log::info!("submitted {array} as job {jobid}");
            ctx.cache.touch_record(&unit_dir)?;
            ctx.cache.set_time(&unit_dir, bspool::control::now_epoch())?;
            ctx.cache.counter(&unit_dir)?;
            Ok(())
        }
        SubmitStatus::QueueClosed => error(format!(
            "queue {} is closed; {} was not submitted",
            config.queue, array
        )),
    }
}

fn command_validate(
    config: &Config,
    opts: &RootOptions,
    args: &[PathBuf],
) -> bspool::Result<()> {
    let suite = suite::resolve(&config.suite)?;
    for root in args {
        // Only an explicitly supplied cache gets the verdicts written back.
        let cache = match &opts.cachefile {
            Some(path) => Some(CompletionCache::open(
                &absolute_path(path.clone()),
                config.db_tries,
            )?),
            None => None,
        };
        let report = validate_spool(suite.as_ref(), root, cache.as_ref())?;
        for (unit, health) in report {
            match health {
                UnitHealth::NoInputs => println!("{}: no inputs", unit.path.display()),
                UnitHealth::Complete => println!("{}: complete", unit.path.display()),
                UnitHealth::Incomplete { missing, total } => println!(
                    "{}: incomplete ({}/{} done): {}",
                    unit.path.display(),
                    total - missing.len(),
                    total,
                    missing.join(",")
                ),
            }
        }
    }
    Ok(())
}

async fn run(opts: RootOptions, config: Config) -> bspool::Result<()> {
    let action = resolve_action(&opts)?;
    let args = checked_args(&opts)?;

    if opts.startpos.is_some() || opts.endpos.is_some() {
        let windowed_build = matches!(action, Action::Build) && args.len() == 1;
        let windowed_process = matches!(action, Action::Process(_)) && args.is_empty();
        if !windowed_build && !windowed_process {
            return Err(SpoolError::ConfigError(
                "-S/-E require a single spool directory".to_string(),
            ));
        }
    }

    match action {
        Action::Build => {
            require_dirs(&args)?;
            command_build(&config, &opts, &args).await
        }
        Action::Count => command_count(&config, &opts, &args).await,
        Action::Process(dir) => command_process(&config, &opts, &dir).await,
        Action::Submit => command_submit(&config, &opts, &args).await,
        Action::Validate => {
            require_dirs(&args)?;
            command_validate(&config, &opts, &args)
        }
        Action::Wait => command_wait(&config, &opts, &args).await,
    }
}

fn require_dirs(args: &[PathBuf]) -> bspool::Result<()> {
    if args.is_empty() {
        return Err(SpoolError::ConfigError(
            "this action needs at least one spool directory".to_string(),
        ));
    }
    if let Some(bad) = args.iter().find(|p| !p.is_dir()) {
        return Err(SpoolError::ConfigError(format!(
            "{} is not a directory",
            bad.display()
        )));
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = RootOptions::parse();

    let config = match Config::load(&opts.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bspool: {e}");
            std::process::exit(1);
        }
    };

    let logfile = opts.logfile.clone().or_else(|| config.logfile.clone());
    if let Err(e) = setup_logging(opts.debug, logfile.as_deref()) {
        eprintln!("bspool: cannot set up logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(opts, config).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}
