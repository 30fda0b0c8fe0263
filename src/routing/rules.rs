use std::path::Path;

use config::FileFormat;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingConfigError {
    #[error("failed to read routing config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse routing config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("domain is mandatory for v1 rule (version {version})")]
    MissingDomain { version: String },

    #[error("duplicate endpoint '{action}' found for version {version}; v2 rules are domain-agnostic")]
    DuplicateV2 { action: String, version: String },

    #[error("duplicate endpoint '{action}' found for version {version} and domain {domain}")]
    DuplicateV1 {
        action: String,
        version: String,
        domain: String,
    },

    #[error("rule for version {version} has target type '{target_type}' but no {field}")]
    MissingTargetField {
        version: String,
        target_type: &'static str,
        field: &'static str,
    },

    #[error("bap rule for version {version} must not carry a fallback url")]
    BapFallback { version: String },

    #[error("invalid routing mode '{0}', expected 'caller' or 'receiver'")]
    InvalidMode(String),

    #[error("router plugin config is missing the '{0}' key")]
    MissingConfigKey(&'static str),
}

/// Target type as written in the rules file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTargetType {
    Url,
    Bpp,
    Bap,
    Msgq,
    Publisher,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTarget {
    pub url: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_id: Option<String>,
    #[serde(default)]
    pub exclude_action: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub version: String,
    #[serde(default)]
    pub domain: Option<String>,
    pub target_type: RuleTargetType,
    #[serde(default)]
    pub target: RuleTarget,
    pub endpoints: Vec<String>,
}

impl RoutingRule {
    /// Beckn v2 rules are keyed without the domain.
    pub fn is_v2(&self) -> bool {
        self.version.split('.').next() == Some("2")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfigFile {
    pub routing_rules: Vec<RoutingRule>,
}

impl RoutingConfigFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RoutingConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RoutingConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, RoutingConfigError> {
        let expanded = crate::config::expand_env(raw);
        let parsed = config::Config::builder()
            .add_source(config::File::from_str(&expanded, FileFormat::Yaml))
            .build()?;
        Ok(parsed.try_deserialize()?)
    }
}
