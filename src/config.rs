use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::error::SpoolError;

/// Controller configuration, loaded from a YAML mapping.
///
/// The admission policy is driven by four numbers: `queueceiling` and
/// `queuefloor` bound the cluster queue depth the controller is willing to
/// add to, `churnrate` is the minimum number of seconds between two
/// decision passes over the same spool unit, and `sleepval` is how long
/// the controller naps whenever it has to back off.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// LSF queue that all submissions go to.
    pub queue: String,
    /// Seconds slept in the churn guard, the queue-full loop and `-w`.
    pub sleepval: u64,
    /// Queue depth above which no further submissions are made.
    pub queueceiling: u32,
    /// Queue depth below which a full queue is considered drained again.
    pub queuefloor: u32,
    /// Minimum seconds between decision passes for one spool unit.
    pub churnrate: u64,
    /// Submission attempts per unit before it is abandoned; 0 = no cap.
    pub lsf_tries: u32,
    /// Attempts to open the completion cache before giving up.
    pub db_tries: u32,
    pub suite: SuiteConfig,

    /// When set, queue depth is measured as this user's job count instead
    /// of the queue-wide figure from `bqueues`.
    pub user: Option<String>,
    /// Passed to `bsub -u` so the cluster mails job reports.
    pub email: Option<String>,
    /// Free-form extra arguments spliced into every `bsub` invocation.
    pub bsubargs: Option<String>,
    /// Sentinel file; its existence stops new submissions.
    pub stopflag: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    /// Bound on process-phase sweeps; absent means sweep until done.
    pub max_sweeps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteConfig {
    pub name: String,
    #[serde(default)]
    pub parameters: String,
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Config> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SpoolError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|e| {
            SpoolError::ConfigError(format!("{}: {}", path.display(), e))
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    const FULL: &str = r#"
queue: long
sleepval: 60
queueceiling: 10000
queuefloor: 2000
churnrate: 120
lsf_tries: 3
db_tries: 5
user: someone
email: someone@example.org
bsubargs: "-R span[hosts=1]"
stopflag: /tmp/spool-stop
logfile: /var/log/bspool.log
suite:
  name: shell
  parameters: "process-one %{INPUT} > %{OUTPUT}"
"#;

    #[test]
    fn parse_full_config() {
        let config: Config = serde_yaml::from_str(FULL).unwrap();
        assert_eq!(config.queue, "long");
        assert_eq!(config.sleepval, 60);
        assert_eq!(config.queueceiling, 10000);
        assert_eq!(config.queuefloor, 2000);
        assert_eq!(config.churnrate, 120);
        assert_eq!(config.lsf_tries, 3);
        assert_eq!(config.db_tries, 5);
        assert_eq!(config.user.as_deref(), Some("someone"));
        assert_eq!(config.suite.name, "shell");
        assert!(config.max_sweeps.is_none());
    }

    #[test]
    fn missing_required_key_names_it() {
        let without_queue = FULL.replace("queue: long\n", "");
        let err = serde_yaml::from_str::<Config>(&without_queue).unwrap_err();
        assert!(err.to_string().contains("queue"), "{}", err);
    }

    #[test]
    fn optional_keys_default_to_none() {
        let minimal = r#"
queue: short
sleepval: 1
queueceiling: 100
queuefloor: 10
churnrate: 0
lsf_tries: 0
db_tries: 1
suite:
  name: shell
"#;
        let config: Config = serde_yaml::from_str(minimal).unwrap();
        assert!(config.user.is_none());
        assert!(config.email.is_none());
        assert!(config.bsubargs.is_none());
        assert!(config.stopflag.is_none());
        assert!(config.logfile.is_none());
        assert_eq!(config.suite.parameters, "");
    }
}
