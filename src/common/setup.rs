use std::fs::OpenOptions;
use std::path::Path;

use env_logger::{Target, DEFAULT_FILTER_ENV};
use log::LevelFilter;

/// Sets the behavior of the logger, based on the `-d` flag and passed
/// environment variables such as `RUST_LOG`.
///
/// When `logfile` is given, all log output is appended to that file
/// instead of stderr. A controller that cannot open its log file must
/// not run, so the failure is surfaced to the caller.
pub fn setup_logging(debug: bool, logfile: Option<&Path>) -> crate::Result<()> {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let has_debug = std::env::var(DEFAULT_FILTER_ENV)
        .map(|v| v.contains("debug"))
        .unwrap_or(false);

    if debug || has_debug {
        builder.format_timestamp_millis();
    } else {
        builder.format_timestamp_secs();
    }

    if let Some(path) = logfile {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    // Overwrite the defaults from env
    builder.parse_default_env();
    builder.init();
    Ok(())
}
