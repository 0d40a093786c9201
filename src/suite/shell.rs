use std::path::Path;

use crate::common::error::SpoolError;
use crate::spool::output_path;
use crate::suite::Suite;

const INPUT_PLACEHOLDER: &str = "%{INPUT}";
const OUTPUT_PLACEHOLDER: &str = "%{OUTPUT}";
const DIR_PLACEHOLDER: &str = "%{DIR}";

/// Suite driven entirely by configuration: `suite.parameters` is a shell
/// command template with `%{INPUT}`, `%{OUTPUT}` and `%{DIR}`
/// placeholders. An output counts as complete when it exists beside its
/// input and is non-empty.
#[derive(Debug)]
pub struct ShellSuite {
    template: String,
}

impl ShellSuite {
    pub fn new(parameters: &str) -> crate::Result<Self> {
        if parameters.trim().is_empty() {
            return Err(SpoolError::ConfigError(
                "shell suite requires a command template in suite.parameters".to_string(),
            ));
        }
        if !parameters.contains(INPUT_PLACEHOLDER) {
            return Err(SpoolError::ConfigError(format!(
                "shell suite template does not mention {INPUT_PLACEHOLDER}"
            )));
        }
        Ok(Self {
            template: parameters.to_string(),
        })
    }
}

impl Suite for ShellSuite {
    fn action(&self, unit_dir: &Path, input_name: &str) -> String {
        self.template
            .replace(INPUT_PLACEHOLDER, input_name)
            .replace(OUTPUT_PLACEHOLDER, &format!("/tmp/{input_name}-output"))
            .replace(DIR_PLACEHOLDER, &unit_dir.display().to_string())
    }

    fn is_complete(&self, input: &Path) -> bool {
        match std::fs::metadata(output_path(input)) {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use tempdir::TempDir;

    use crate::suite::Suite;

    use super::ShellSuite;

    #[test]
    fn template_expansion() {
        let suite = ShellSuite::new("align %{INPUT} -d %{DIR} > %{OUTPUT}").unwrap();
        assert_eq!(
            suite.action(Path::new("/spool/u"), "u-$LSB_JOBINDEX"),
            "align u-$LSB_JOBINDEX -d /spool/u > /tmp/u-$LSB_JOBINDEX-output"
        );
    }

    #[test]
    fn template_must_mention_input() {
        assert!(ShellSuite::new("true").is_err());
        assert!(ShellSuite::new("").is_err());
    }

    #[test]
    fn empty_output_is_incomplete() {
        let tmp = TempDir::new("suite").unwrap();
        let input = tmp.path().join("u-1");
        File::create(&input).unwrap();

        let suite = ShellSuite::new("run %{INPUT}").unwrap();
        assert!(!suite.is_complete(&input));

        File::create(tmp.path().join("u-1-output")).unwrap();
        assert!(!suite.is_complete(&input));

        let mut output = File::create(tmp.path().join("u-1-output")).unwrap();
        output.write_all(b"done\n").unwrap();
        assert!(suite.is_complete(&input));
    }
}
