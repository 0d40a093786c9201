use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::common::error::SpoolError;

/// The granularity at which completeness and submission decisions are
/// made: either a subdirectory of the spool root, or the root itself when
/// it holds input files directly.
#[derive(Debug, Clone)]
pub struct SpoolUnit {
    pub path: PathBuf,
    pub name: String,
}

impl SpoolUnit {
    pub fn from_dir(path: &Path) -> crate::Result<SpoolUnit> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SpoolError::StructuralError(format!(
                    "{} has no usable directory name",
                    path.display()
                ))
            })?
            .to_string();
        Ok(SpoolUnit {
            path: path.to_path_buf(),
            name,
        })
    }

    /// The name submitted jobs carry, and the name queried for running jobs.
    pub fn job_name(&self) -> &str {
        &self.name
    }
}

/// Job-array specification handed to the scheduler: either the whole unit
/// (`unit[1-K]`) or one input of it (`unit[N]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySpec {
    Range { unit: String, count: u32 },
    Single { unit: String, index: u32 },
}

impl ArraySpec {
    /// Array covering every input of a unit. A unit with no inputs cannot
    /// be turned into an array.
    pub fn whole_unit(unit: &str, count: u32) -> crate::Result<ArraySpec> {
        if count == 0 {
            return Err(SpoolError::StructuralError(format!(
                "spool unit {unit} contains no input files"
            )));
        }
        Ok(ArraySpec::Range {
            unit: unit.to_string(),
            count,
        })
    }

    /// Array addressing a single input of `unit`, e.g. `u-3` -> `u[3]`.
    pub fn for_input(unit: &str, input_name: &str) -> crate::Result<ArraySpec> {
        let index = trailing_index(input_name).ok_or_else(|| {
            SpoolError::StructuralError(format!(
                "input file {input_name} has no trailing -<N> index"
            ))
        })?;
        Ok(ArraySpec::Single {
            unit: unit.to_string(),
            index,
        })
    }

    /// Array for a path given on the command line; the unit is the parent
    /// directory.
    pub fn for_file(path: &Path) -> crate::Result<ArraySpec> {
        let name = base_name(path).ok_or_else(|| {
            SpoolError::StructuralError(format!("{} has no usable file name", path.display()))
        })?;
        let unit = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SpoolError::StructuralError(format!(
                    "{} has no parent spool unit",
                    path.display()
                ))
            })?;
        Self::for_input(unit, name)
    }

    /// The input-file token placed on the command line. For a range the
    /// scheduler expands `$LSB_JOBINDEX` on the execution host.
    pub fn input_token(&self) -> String {
        match self {
            ArraySpec::Range { unit, .. } => format!("{unit}-$LSB_JOBINDEX"),
            ArraySpec::Single { unit, index } => format!("{unit}-{index}"),
        }
    }
}

impl fmt::Display for ArraySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArraySpec::Range { unit, count } => write!(f, "{unit}[1-{count}]"),
            ArraySpec::Single { unit, index } => write!(f, "{unit}[{index}]"),
        }
    }
}

fn index_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"-(\d+)$").expect("invalid index regex"))
}

/// Trailing `-<N>` integer of a file's base name, if any.
pub fn trailing_index(name: &str) -> Option<u32> {
    index_rx()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn base_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Processing-order key: the trailing index of the base name, with a
/// missing index sorting first.
pub fn sort_key(path: &Path) -> u32 {
    base_name(path).and_then(trailing_index).unwrap_or(0)
}

pub fn sort_by_index(paths: &mut [PathBuf]) {
    paths.sort_by_key(|p| (sort_key(p), p.clone()));
}

/// One level of a spool directory, dotfiles excluded. No recursion.
pub struct DirListing {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

pub fn list_entries(path: &Path) -> crate::Result<DirListing> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let kind = entry.file_type()?;
        if kind.is_dir() {
            dirs.push(entry.path());
        } else {
            files.push(entry.path());
        }
    }
    sort_by_index(&mut files);
    sort_by_index(&mut dirs);
    Ok(DirListing { files, dirs })
}

/// Spool units under a root: each child directory is one unit; a root
/// holding only files is itself the single unit.
pub fn discover_units(root: &Path) -> crate::Result<Vec<SpoolUnit>> {
    let listing = list_entries(root)?;
    if listing.dirs.is_empty() {
        return Ok(vec![SpoolUnit::from_dir(root)?]);
    }
    listing
        .dirs
        .iter()
        .map(|d| SpoolUnit::from_dir(d))
        .collect()
}

/// Input files of a unit: regular entries whose name does not end in
/// `-output`, in trailing-index order.
pub fn inputs(unit_dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let listing = list_entries(unit_dir)?;
    Ok(listing
        .files
        .into_iter()
        .filter(|f| !matches!(base_name(f), Some(name) if name.ends_with("-output")))
        .collect())
}

/// Output file produced for an input: a `-output` sibling.
pub fn output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push("-output");
    PathBuf::from(name)
}

/// Verifies that a unit contains only entries that belong to it. Anything
/// else in the directory means the tree is not a spool and processing it
/// would submit garbage, so the offenders are a fatal error.
pub fn check_structure(unit: &SpoolUnit) -> crate::Result<()> {
    let pattern = format!(
        r"(^|\w+-){}.*(-\d+)+(-output)?$",
        regex::escape(&unit.name)
    );
    let rx = Regex::new(&pattern)
        .map_err(|e| SpoolError::StructuralError(format!("bad unit name {}: {e}", unit.name)))?;

    let mut offenders = Vec::new();
    for entry in std::fs::read_dir(&unit.path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if !rx.is_match(&name) {
            offenders.push(name);
        }
    }
    if offenders.is_empty() {
        Ok(())
    } else {
        offenders.sort();
        Err(SpoolError::StructuralError(format!(
            "unexpected entries in spool unit {}: {}",
            unit.path.display(),
            offenders.join(", ")
        )))
    }
}
