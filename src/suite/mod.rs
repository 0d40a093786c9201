pub mod shell;

use std::path::Path;

use crate::common::error::SpoolError;
use crate::config::SuiteConfig;

/// A suite defines how one input file is turned into work, and how to
/// recognize the finished result.
///
/// `is_complete` implementations must be deterministic and side-effect
/// free: the decider and the validator both rely on asking the same
/// question repeatedly and getting the same answer.
pub trait Suite: std::fmt::Debug {
    /// Shell command executed on the scheduler host to produce
    /// `/tmp/<input_name>-output` (the scheduler's post-exec step moves it
    /// into the unit directory).
    fn action(&self, unit_dir: &Path, input_name: &str) -> String;

    /// Whether the output beside `input` is a valid completion.
    fn is_complete(&self, input: &Path) -> bool;
}

/// Resolve a configured suite by name. An unknown name is a startup
/// error, not a runtime one.
pub fn resolve(config: &SuiteConfig) -> crate::Result<Box<dyn Suite>> {
    match config.name.as_str() {
        "shell" => Ok(Box::new(shell::ShellSuite::new(&config.parameters)?)),
        other => Err(SpoolError::ConfigError(format!("unknown suite {other}"))),
    }
}
