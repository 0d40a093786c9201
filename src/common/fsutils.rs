use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub fn absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        let env = std::env::current_dir().unwrap();
        env.join(path)
    }
}

/// Default cache file for a spool root: a `.cache` sibling of the root
/// itself, e.g. `/data/spool` -> `/data/spool.cache`.
pub fn default_cache_path(root: &Path) -> PathBuf {
    let mut name = OsString::from(root.as_os_str());
    name.push(".cache");
    PathBuf::from(name)
}

/// Logs directory for a spool root: `<root>.logs`, holding per-array-element
/// stderr/stdout of submitted jobs.
pub fn logs_dir(root: &Path) -> PathBuf {
    let mut name = OsString::from(root.as_os_str());
    name.push(".logs");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{default_cache_path, logs_dir};

    #[test]
    fn cache_path_is_sibling() {
        assert_eq!(
            default_cache_path(Path::new("/data/spool")),
            PathBuf::from("/data/spool.cache")
        );
    }

    #[test]
    fn logs_dir_is_sibling() {
        assert_eq!(
            logs_dir(Path::new("/data/spool")),
            PathBuf::from("/data/spool.logs")
        );
    }
}
