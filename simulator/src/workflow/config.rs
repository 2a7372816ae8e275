use crate::generator::profile::{MotionProfileConfig, TrackConfig};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use surakshacore::emergency::EmergencyConfig;
use surakshacore::interface::memory::FailurePlan;
use surakshacore::prelude::TrustedContact;
use surakshacore::sensing::{ShakeConfig, WatchConfig};

/// One simulated session: sensor input, contacts, and which backend calls
/// should fail.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    pub shake: ShakeConfig,
    pub watch: WatchConfig,
    pub emergency: EmergencyConfig,
    pub contacts: Vec<TrustedContact>,
    pub failures: FailurePlan,
    pub motion: MotionProfileConfig,
    pub track: TrackConfig,
    /// Press the SOS button once the shake-triggered run has cooled down.
    pub button_sos: bool,
    pub live_sharing: bool,
    /// Stop sharing at the end instead of leaving a session to resume.
    pub stop_sharing: bool,
    pub store_path: Option<PathBuf>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            // SOS screen debounce.
            shake: ShakeConfig {
                timeout_ms: 2_000,
                ..Default::default()
            },
            watch: WatchConfig::default(),
            emergency: EmergencyConfig::default(),
            contacts: vec![
                sample_contact("c1", "Asha", Some("asha@example.com")),
                sample_contact("c2", "Ravi", None),
            ],
            failures: FailurePlan::default(),
            motion: MotionProfileConfig::default(),
            track: TrackConfig::default(),
            button_sos: false,
            live_sharing: true,
            stop_sharing: true,
            store_path: None,
        }
    }
}

fn sample_contact(id: &str, name: &str, email: Option<&str>) -> TrustedContact {
    TrustedContact {
        id: Some(id.to_string()),
        name: name.to_string(),
        phone: "+910000000000".to_string(),
        email: email.map(str::to_string),
        is_trusted: true,
        notifications_enabled: true,
    }
}

impl ScenarioConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading scenario {}", path_ref.display()))?;
        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing scenario {}", path_ref.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"name: commute\nshake:\n  threshold: 18.5\nfailures:\n  push: true\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = ScenarioConfig::load(&path).unwrap();
        assert_eq!(cfg.name, "commute");
        assert_eq!(cfg.shake.threshold, 18.5);
        assert_eq!(cfg.shake.timeout_ms, 1_000);
        assert!(cfg.failures.push);
        assert!(!cfg.failures.alert);
        assert_eq!(cfg.emergency.shake_grace_ms, 5_000);
        assert_eq!(cfg.contacts.len(), 2);
    }

    #[test]
    fn contacts_accept_backend_field_names() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"contacts:\n  - _id: x1\n    name: Meera\n    email: meera@example.com\n    isTrusted: true\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = ScenarioConfig::load(&path).unwrap();
        assert_eq!(cfg.contacts.len(), 1);
        assert!(cfg.contacts[0].is_recipient());
    }

    #[test]
    fn unreadable_scenario_reports_path() {
        let err = ScenarioConfig::load("/nonexistent/scenario.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/scenario.yaml"));
    }
}
