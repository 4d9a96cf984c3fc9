//! Engine configuration
//!
//! One file (TOML, or YAML when the extension is `.yaml`/`.yml`) carries the
//! engine tuning, the delivery policy, and the department and actor data:
//!
//! ```toml
//! [engine]
//! sweep_interval_secs = 30
//!
//! [delivery]
//! max_attempts = 5
//!
//! [[departments]]
//! id = "cardiology"
//! name = "Cardiology"
//! code = "CARD"
//! sla_minutes = { EMERGENCY = 30, URGENT = 240, ROUTINE = 2880 }
//! hierarchy = [
//!     { title = "Registrar", seniority = 1 },
//!     { title = "Consultant", seniority = 2 },
//!     { title = "Head of Department", seniority = 3, actor = "dr-hale" },
//! ]
//!
//! [[actors]]
//! id = "dr-hale"
//! department = "cardiology"
//! seniority = 3
//! capabilities = ["CAN_ACKNOWLEDGE_IN_OWN_DEPARTMENT"]
//! ```
//!
//! Unset engine fields fall back to `CONSULT_*` environment variables, then
//! to built-in defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consult::Urgency;
use crate::department::Department;
use crate::events::DeliveryPolicy;
use crate::identity::Actor;

/// Read `key` from the environment, falling back to `default` when unset or unparsable
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Errors loading or validating a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Escalation sweep tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between sweep ticks
    pub sweep_interval_secs: u64,
    /// Overdue consults processed in parallel within one sweep
    pub sweep_concurrency: usize,
    /// Deadline for escalating one consult
    pub record_timeout_secs: u64,
    /// Minimum gap between two escalations of the same consult (0 = every tick)
    pub min_escalation_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // CONSULT_SWEEP_INTERVAL_SECS: Seconds between escalation sweeps
            sweep_interval_secs: env_or("CONSULT_SWEEP_INTERVAL_SECS", 60),
            // CONSULT_SWEEP_CONCURRENCY: Parallel records per sweep
            sweep_concurrency: env_or("CONSULT_SWEEP_CONCURRENCY", 8),
            // CONSULT_RECORD_TIMEOUT_SECS: Per-record escalation deadline
            record_timeout_secs: env_or("CONSULT_RECORD_TIMEOUT_SECS", 10),
            // CONSULT_MIN_ESCALATION_INTERVAL_SECS: Cooldown between escalations
            min_escalation_interval_secs: env_or("CONSULT_MIN_ESCALATION_INTERVAL_SECS", 0),
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs.max(1))
    }

    pub fn min_escalation_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_escalation_interval_secs as i64)
    }
}

/// Contents of a configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub delivery: DeliveryPolicy,
    pub departments: Vec<Department>,
    pub actors: Vec<Actor>,
}

impl ConfigFile {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let file: ConfigFile = if is_yaml {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            toml::from_str(&text).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        };

        file.validate()?;
        Ok(file)
    }

    /// Structural checks that would otherwise surface as confusing runtime errors
    ///
    /// Malformed hierarchies are not rejected here; the sweep reports them per
    /// record so the rest of the catalog stays usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for department in &self.departments {
            if !seen.insert(department.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "department {} is defined twice",
                    department.id
                )));
            }
            for urgency in Urgency::all() {
                if department.sla.minutes(*urgency) == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "department {} has a zero-minute {} SLA",
                        department.id, urgency
                    )));
                }
            }
        }

        let mut actors = HashSet::new();
        for actor in &self.actors {
            if !actors.insert(actor.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "actor {} is defined twice",
                    actor.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Capability;
    use std::io::Write;

    const SAMPLE: &str = r#"
[engine]
sweep_interval_secs = 15
min_escalation_interval_secs = 600

[delivery]
max_attempts = 5

[[departments]]
id = "cardiology"
name = "Cardiology"
code = "CARD"
sla_minutes = { EMERGENCY = 30, URGENT = 240 }
hierarchy = [
    { title = "Registrar", seniority = 1 },
    { title = "Head of Department", seniority = 3, actor = "dr-hale" },
]

[[actors]]
id = "dr-hale"
department = "cardiology"
seniority = 3
capabilities = ["CAN_ACKNOWLEDGE_IN_OWN_DEPARTMENT", "CAN_FORCE_CLOSE"]
"#;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(".toml", SAMPLE);
        let config = ConfigFile::load(file.path()).unwrap();

        assert_eq!(config.engine.sweep_interval_secs, 15);
        assert_eq!(
            config.engine.min_escalation_interval(),
            chrono::Duration::minutes(10)
        );
        assert_eq!(config.delivery.max_attempts, 5);

        let cardiology = &config.departments[0];
        assert!(cardiology.accepts_consults());
        assert_eq!(cardiology.sla.minutes(Urgency::Urgent), Some(240));
        assert_eq!(cardiology.sla.minutes(Urgency::Routine), None);
        assert_eq!(cardiology.hierarchy.depth(), 2);
        assert_eq!(
            cardiology.hierarchy.rung(1).unwrap().actor.as_deref(),
            Some("dr-hale")
        );

        assert!(config.actors[0].has(Capability::ForceClose));
    }

    #[test]
    fn test_load_yaml() {
        let yaml = r#"
departments:
  - id: oncology
    name: Oncology
    code: ONC
    accepting_consults: false
    sla_minutes:
      ROUTINE: 2880
    hierarchy:
      - { title: Registrar, seniority: 1 }
"#;
        let file = write_temp(".yaml", yaml);
        let config = ConfigFile::load(file.path()).unwrap();
        assert!(!config.departments[0].accepts_consults());
        assert_eq!(config.departments[0].sla.minutes(Urgency::Routine), Some(2880));
        assert!(config.actors.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_zero_sla() {
        let dup = format!("{}\n{}", SAMPLE, &SAMPLE[SAMPLE.find("[[departments]]").unwrap()..]);
        let file = write_temp(".toml", &dup);
        assert!(matches!(
            ConfigFile::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let zero = SAMPLE.replace("URGENT = 240", "URGENT = 0");
        let file = write_temp(".toml", &zero);
        let err = ConfigFile::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("zero-minute URGENT"));
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let file = write_temp(".toml", "[engine\n");
        assert!(matches!(
            ConfigFile::load(file.path()),
            Err(ConfigError::Toml { .. })
        ));

        let missing = ConfigFile::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
