use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::probe::target::Target;

/// Target file given with `--config`.
#[derive(Debug, Deserialize)]
pub struct TargetFile {
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Anything [`Target::parse`] accepts.
    pub addr: String,

    /// Defaults to `addr`.
    #[serde(default)]
    pub label: Option<String>,
}

impl TargetFile {
    pub fn from_yaml(yaml: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::TargetFileFormat {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::TargetFile {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&yaml, &display)
    }

    pub fn into_targets(self) -> Result<Vec<Target>, ConfigError> {
        self.targets
            .into_iter()
            .map(|entry| {
                let target = Target::parse(&entry.addr)?;
                Ok(match entry.label {
                    Some(label) => target.with_label(label),
                    None => target,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::probe::target::Scheme;

    #[test]
    fn test_target_file_deserialization() {
        let yaml = r#"
                    targets:
                        - addr: https://www.example.com
                          label: example
                        - addr: 10.0.0.1:22
                                    "#;

        let file = TargetFile::from_yaml(yaml, "inline").expect("valid yaml");
        let targets = file.into_targets().expect("valid targets");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].label, "example");
        assert_eq!(targets[0].scheme, Scheme::Https);
        // label defaults to the address
        assert_eq!(targets[1].label, "10.0.0.1:22");
        assert_eq!(targets[1].port, 22);
    }

    #[test]
    fn test_invalid_target_in_file() {
        let yaml = "targets:\n  - addr: no-port-here\n";
        let file = TargetFile::from_yaml(yaml, "inline").unwrap();
        assert!(matches!(
            file.into_targets(),
            Err(ConfigError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            TargetFile::from_yaml("targets: [", "inline"),
            Err(ConfigError::TargetFileFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            TargetFile::load(Path::new("/nonexistent/oxyprobe.yml")),
            Err(ConfigError::TargetFile { .. })
        ));
    }
}
