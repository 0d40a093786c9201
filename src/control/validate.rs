use std::path::Path;

use crate::cache::{Completion, CompletionCache};
use crate::spool::{self, SpoolUnit};
use crate::suite::Suite;

/// Read-only health of one spool unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitHealth {
    NoInputs,
    Complete,
    /// `missing` lists inputs without a valid output, out of `total`
    /// inputs present.
    Incomplete { missing: Vec<String>, total: usize },
}

/// Checks a unit on the filesystem: structure first (anything foreign in
/// the directory is fatal), then the suite's completeness predicate over
/// every input.
pub fn inspect_unit(suite: &dyn Suite, unit: &SpoolUnit) -> crate::Result<UnitHealth> {
    spool::check_structure(unit)?;
    let inputs = spool::inputs(&unit.path)?;
    if inputs.is_empty() {
        return Ok(UnitHealth::NoInputs);
    }

    let total = inputs.len();
    let mut missing = Vec::new();
    for input in &inputs {
        if !suite.is_complete(input) {
            if let Some(name) = input.file_name().and_then(|n| n.to_str()) {
                missing.push(name.to_string());
            }
        }
    }

    if missing.is_empty() {
        Ok(UnitHealth::Complete)
    } else {
        Ok(UnitHealth::Incomplete { missing, total })
    }
}

/// Walks a spool tree and reports per-unit health. When a cache is
/// supplied, the verdicts are also recorded there (complete in {0,1};
/// abandonment is the decider's call, never the validator's).
pub fn validate_spool(
    suite: &dyn Suite,
    root: &Path,
    cache: Option<&CompletionCache>,
) -> crate::Result<Vec<(SpoolUnit, UnitHealth)>> {
    let units = spool::discover_units(root)?;
    let mut report = Vec::with_capacity(units.len());
    for unit in units {
        let health = inspect_unit(suite, &unit)?;
        if let Some(cache) = cache {
            record_health(cache, &unit, &health)?;
        }
        report.push((unit, health));
    }
    Ok(report)
}

fn record_health(
    cache: &CompletionCache,
    unit: &SpoolUnit,
    health: &UnitHealth,
) -> crate::Result<()> {
    match health {
        UnitHealth::NoInputs => Ok(()),
        UnitHealth::Complete => {
            cache.touch_record(&unit.path)?;
            cache.set_completion(&unit.path, Completion::Complete)?;
            cache.set_files(&unit.path, &[])
        }
        UnitHealth::Incomplete { missing, total } => {
            cache.touch_record(&unit.path)?;
            cache.set_completion(&unit.path, Completion::Incomplete)?;
            if missing.len() == *total {
                cache.set_files(&unit.path, &[])
            } else {
                cache.set_files(&unit.path, missing)
            }
        }
    }
}
