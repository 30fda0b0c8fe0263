use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Role;

/// Top-level adapter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_bind_addr")]
    pub address: SocketAddr,
    /// Request handling deadline in seconds; 0 keeps the server default.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: default_bind_addr(),
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One mounted handler endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    pub name: String,
    /// HTTP path prefix the module serves under, e.g. `/bap/caller`.
    pub path: String,
    pub handler: HandlerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub role: Role,
    #[serde(default)]
    pub subscriber_id: Option<String>,
    #[serde(default)]
    pub http_client_config: HttpClientConfig,
    #[serde(default)]
    pub plugins: PluginBindings,
    pub steps: Vec<String>,
}

/// Outbound HTTP client knobs. Zero means "keep the client default".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientConfig {
    #[serde(default)]
    pub max_idle_conns_per_host: usize,
    #[serde(default)]
    pub idle_conn_timeout_secs: u64,
    #[serde(default)]
    pub response_header_timeout_secs: u64,
    /// Deadline for post-response async delivery; 0 means no deadline.
    #[serde(default)]
    pub delivery_timeout_secs: u64,
}

impl HttpClientConfig {
    pub fn idle_conn_timeout(&self) -> Option<Duration> {
        nonzero_secs(self.idle_conn_timeout_secs)
    }

    pub fn response_header_timeout(&self) -> Option<Duration> {
        nonzero_secs(self.response_header_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Option<Duration> {
        nonzero_secs(self.delivery_timeout_secs)
    }
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Capability bindings for one module. A missing binding leaves the
/// capability unset; steps that require it fail when the module is built.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginBindings {
    pub cache: Option<PluginConfig>,
    pub registry: Option<PluginConfig>,
    pub key_manager: Option<PluginConfig>,
    pub sign_validator: Option<PluginConfig>,
    pub signer: Option<PluginConfig>,
    pub schema_validator: Option<PluginConfig>,
    pub router: Option<PluginConfig>,
    pub publisher: Option<PluginConfig>,
    pub transport_wrapper: Option<PluginConfig>,
    pub ondc_validator: Option<PluginConfig>,
    pub ondc_workbench: Option<PluginConfig>,
    /// Pre-pipeline middlewares, applied in list order.
    #[serde(default)]
    pub middleware: Vec<PluginConfig>,
    /// Custom pipeline steps, referenced from `steps` by their id.
    #[serde(default)]
    pub steps: Vec<PluginConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_app_name() -> String {
    "onix".to_string()
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_log_level() -> String {
    "info".to_string()
}
