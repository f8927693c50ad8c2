use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::models::{ProjectId, StatusId};
use crate::templates::{TemplateError, Templates};

pub const CONFIG_ENV: &str = "SECBRIDGE_CONFIG";
pub const TOKEN_ENV: &str = "SECBRIDGE_TRACKER_TOKEN";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/secbridge.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    pub monitoring: MonitoringConf,
    pub tracker: TrackerConf,
    #[serde(default)]
    pub templates: TemplatesConf,
    pub database: DatabaseConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConf {
    pub address: String, // ex: "127.0.0.1:6557" ou "/var/lib/nagios/rw/live"
    #[serde(default = "default_service_description")]
    pub service_description: String,
    #[serde(default = "default_monitoring_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrackerConf {
    pub url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    pub default_project_id: ProjectId,
    #[serde(default = "default_resolved_status")]
    pub resolved_status_id: StatusId,
    #[serde(default)]
    pub adopt_by_summary: bool,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TemplatesConf {
    pub summary: String,
    pub description: String,
    pub note: String,
    pub close: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConf {
    pub path: PathBuf,
}

fn default_service_description() -> String {
    "security".into()
}

fn default_monitoring_timeout() -> u64 {
    10
}

fn default_category() -> String {
    "General".into()
}

fn default_resolved_status() -> StatusId {
    80
}

fn default_tracker_timeout() -> u64 {
    30
}

impl Default for TemplatesConf {
    fn default() -> Self {
        Self {
            summary: "Security updates available for host {host_name} : {all_packages}".into(),
            description: "The following packages have security updates available : {packages}".into(),
            note: "This packages also have security updates : {packages}".into(),
            close: "No more security update for this host.\nThe packages that have been updated are : {all_packages}".into(),
        }
    }
}

impl TemplatesConf {
    pub fn compile(&self) -> Result<Templates, TemplateError> {
        Templates::compile(&self.summary, &self.description, &self.note, &self.close)
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitoring.address.trim().is_empty() {
            return Err(ConfigError::Invalid("monitoring.address is empty".into()));
        }
        if self.tracker.url.trim().is_empty() {
            return Err(ConfigError::Invalid("tracker.url is empty".into()));
        }
        if self.tracker.default_project_id <= 0 {
            return Err(ConfigError::Invalid(format!(
                "tracker.default_project_id must be positive, got {}",
                self.tracker.default_project_id
            )));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path is empty".into()));
        }
        self.templates.compile()?;
        Ok(())
    }
}

/// Parse + validation d'un document YAML, sans effet de bord
pub fn parse_config(txt: &str) -> Result<BridgeConfig, ConfigError> {
    let cfg: BridgeConfig = serde_yaml::from_str(txt)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Charge la configuration ; le token peut venir de l'environnement (.env)
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg = parse_config(&txt)?;

    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            cfg.tracker.api_token = Some(token);
        }
    }
    if cfg.tracker.api_token.is_none() {
        warn!("no tracker API token configured, requests will be anonymous");
    }
    Ok(cfg)
}

/// Chemin par défaut quand aucun flag n'est passé
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
monitoring:
  address: "127.0.0.1:6557"
tracker:
  url: "https://mantis.example.org"
  default_project_id: 1
database:
  path: "/tmp/links.sqlite"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.monitoring.service_description, "security");
        assert_eq!(cfg.monitoring.timeout_secs, 10);
        assert_eq!(cfg.tracker.category, "General");
        assert_eq!(cfg.tracker.resolved_status_id, 80);
        assert!(!cfg.tracker.adopt_by_summary);
        assert_eq!(cfg.templates, TemplatesConf::default());
    }

    #[test]
    fn test_custom_templates() {
        let txt = format!(
            "{MINIMAL}templates:\n  summary: \"[sec] {{host_name}}\"\n  description: \"pkgs: {{packages}}\"\n  note: \"more: {{packages}}\"\n  close: \"done\"\n"
        );
        let cfg = parse_config(&txt).unwrap();
        assert_eq!(cfg.templates.summary, "[sec] {host_name}");
    }

    #[test]
    fn test_invalid_template_rejected() {
        let txt = format!(
            "{MINIMAL}templates:\n  summary: \"{{host}}\"\n  description: \"{{packages}}\"\n  note: \"{{packages}}\"\n  close: \"done\"\n"
        );
        assert!(matches!(parse_config(&txt), Err(ConfigError::Template(_))));
    }

    #[test]
    fn test_invalid_project_rejected() {
        let txt = MINIMAL.replace("default_project_id: 1", "default_project_id: 0");
        assert!(matches!(parse_config(&txt), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_section_rejected() {
        assert!(matches!(
            parse_config("monitoring:\n  address: x\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/secbridge.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
