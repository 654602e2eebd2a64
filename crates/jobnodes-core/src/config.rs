//! Provisioner configuration.
//!
//! Loaded from TOML. Every field has a default so a partial file is valid:
//!
//! ```toml
//! enabled = true
//! max_nodes_per_label = 5
//! max_idle_time = 10
//! exclude_labels = "master built-in"
//! agent_provision_job = "AgentProvision{_:label}"
//! agent_decommission_job = "AgentDecommission"
//! agent_image = "registry.local/agent-{label}"
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::template::{has_label_placeholder, resolve_label};
use crate::types::{parse_label_set, Label};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub enabled: bool,
    /// Hard ceiling of executor capacity per label.
    pub max_nodes_per_label: u32,
    /// Upper bound (seconds) of the randomized idle retention.
    pub max_idle_time: u32,
    /// Whitespace-separated labels never provisioned on demand.
    pub exclude_labels: String,
    pub agent_provision_job: String,
    pub agent_decommission_job: String,
    pub agent_image: String,
    pub agent_work_dir: String,
    pub git_url: String,
    pub git_revision: String,
    pub revision: String,
    /// Executors configured on each new node.
    pub executors_per_new_node: u32,
    /// Do not provision for a label that already owns an accepting node.
    pub skip_if_label_has_accepting_node: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_nodes_per_label: 5,
            max_idle_time: 10,
            exclude_labels: String::new(),
            agent_provision_job: String::new(),
            agent_decommission_job: String::new(),
            agent_image: String::new(),
            agent_work_dir: String::new(),
            git_url: String::new(),
            git_revision: String::new(),
            revision: String::new(),
            executors_per_new_node: 1,
            skip_if_label_has_accepting_node: false,
        }
    }
}

/// Severity of a configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding from [`ProvisionerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigFinding {
    pub field: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl ProvisionerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn exclude_label_set(&self) -> BTreeSet<Label> {
        parse_label_set(&self.exclude_labels)
    }

    pub fn to_provision_job(&self, label: &Label) -> String {
        resolve_label(&self.agent_provision_job, label.as_str())
    }

    pub fn to_decommission_job(&self, label: &Label) -> String {
        resolve_label(&self.agent_decommission_job, label.as_str())
    }

    pub fn to_agent_image(&self, label: &Label) -> String {
        resolve_label(&self.agent_image, label.as_str())
    }

    pub fn to_git_url(&self, label: &Label) -> String {
        resolve_label(&self.git_url, label.as_str())
    }

    /// Check the configuration and report everything worth an operator's
    /// attention. Errors make on-demand provisioning fail for every label.
    pub fn validate(&self) -> Vec<ConfigFinding> {
        let mut findings = Vec::new();

        let required = [
            ("git_url", &self.git_url),
            ("git_revision", &self.git_revision),
            ("revision", &self.revision),
            ("agent_provision_job", &self.agent_provision_job),
            ("agent_decommission_job", &self.agent_decommission_job),
            ("agent_work_dir", &self.agent_work_dir),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                findings.push(ConfigFinding {
                    field,
                    severity: Severity::Warning,
                    message: format!("please specify {field}"),
                });
            }
        }

        if !self.agent_image.is_empty() && !has_label_placeholder(&self.agent_image) {
            findings.push(ConfigFinding {
                field: "agent_image",
                severity: Severity::Warning,
                message: "please specify the '{label}' placeholder".to_string(),
            });
        }

        let positive = [
            ("max_nodes_per_label", self.max_nodes_per_label),
            ("max_idle_time", self.max_idle_time),
            ("executors_per_new_node", self.executors_per_new_node),
        ];
        for (field, value) in positive {
            if value == 0 {
                findings.push(ConfigFinding {
                    field,
                    severity: Severity::Error,
                    message: format!("{field} must be greater than zero"),
                });
            }
        }

        findings
    }
}

/// Configuration shared between the decision loop and an editor.
///
/// Readers take a whole snapshot; writers swap the snapshot atomically, so
/// a reader never observes a half-updated field.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<ProvisionerConfig>>>,
}

impl SharedConfig {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The current configuration snapshot.
    pub fn current(&self) -> Arc<ProvisionerConfig> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the configuration for all future readers.
    pub fn replace(&self, config: ProvisionerConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> ProvisionerConfig {
        ProvisionerConfig {
            enabled: true,
            agent_provision_job: "AgentProvision{_:label}".to_string(),
            agent_decommission_job: "AgentDecommission{label}".to_string(),
            agent_image: "registry.local/agent-{label}".to_string(),
            agent_work_dir: "/home/agent".to_string(),
            git_url: "https://git.local/{label}.git".to_string(),
            git_revision: "main".to_string(),
            revision: "1".to_string(),
            ..ProvisionerConfig::default()
        }
    }

    #[test]
    fn parse_minimal() {
        let config = ProvisionerConfig::from_toml_str("enabled = true\n").unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_nodes_per_label, 5);
        assert_eq!(config.max_idle_time, 10);
        assert_eq!(config.executors_per_new_node, 1);
        assert!(!config.skip_if_label_has_accepting_node);
    }

    #[test]
    fn parse_rejects_bad_types() {
        let err = ProvisionerConfig::from_toml_str("max_nodes_per_label = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_roundtrip() {
        let config = full_config();
        let text = config.to_toml_string().unwrap();
        let back = ProvisionerConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobnodes.toml");
        std::fs::write(&path, "enabled = true\nmax_nodes_per_label = 2\n").unwrap();
        let config = ProvisionerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_nodes_per_label, 2);

        let missing = ProvisionerConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read(_))));
    }

    #[test]
    fn resolves_templates_per_label() {
        let config = full_config();
        let label = Label::from("linux");
        assert_eq!(config.to_provision_job(&label), "AgentProvision_linux");
        assert_eq!(config.to_decommission_job(&label), "AgentDecommissionlinux");
        assert_eq!(config.to_agent_image(&label), "registry.local/agent-linux");
        assert_eq!(config.to_git_url(&label), "https://git.local/linux.git");
    }

    #[test]
    fn exclude_set() {
        let config = ProvisionerConfig {
            exclude_labels: "master built-in".to_string(),
            ..ProvisionerConfig::default()
        };
        let set = config.exclude_label_set();
        assert!(Label::from("master").matches(&set));
        assert!(!Label::from("agent").matches(&set));
    }

    #[test]
    fn validate_complete_config_is_clean() {
        assert!(full_config().validate().is_empty());
    }

    #[test]
    fn validate_reports_missing_fields_and_placeholder() {
        let config = ProvisionerConfig {
            agent_image: "registry.local/agent".to_string(),
            max_idle_time: 0,
            ..ProvisionerConfig::default()
        };
        let findings = config.validate();
        let fields: Vec<_> = findings.iter().map(|f| f.field).collect();
        assert!(fields.contains(&"git_url"));
        assert!(fields.contains(&"agent_work_dir"));
        assert!(fields.contains(&"agent_image"));

        let idle = findings.iter().find(|f| f.field == "max_idle_time").unwrap();
        assert_eq!(idle.severity, Severity::Error);
    }

    #[test]
    fn shared_config_replaces_snapshot() {
        let shared = SharedConfig::new(ProvisionerConfig::default());
        let before = shared.current();
        assert!(!before.enabled);

        shared.replace(full_config());
        assert!(shared.current().enabled);
        // Snapshots taken earlier are unaffected.
        assert!(!before.enabled);
    }
}
