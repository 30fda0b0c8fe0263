use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Uri;
use tracing::warn;

use crate::config::PluginConfig;
use crate::model::{PayloadContext, ProtocolError, Route, TargetType};
use crate::plugin::manager::Loaded;
use crate::plugin::{PluginError, RouteResolver};

use super::rules::{
    RoutingConfigError, RoutingConfigFile, RoutingRule, RuleTargetType,
};

/// Caller-side modules reverse-proxy synchronously; receiver-side modules
/// ack the upstream immediately and deliver after the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDirection {
    Caller,
    Receiver,
}

impl RoutingDirection {
    fn parse(raw: &str) -> Result<Self, RoutingConfigError> {
        match raw {
            "caller" => Ok(Self::Caller),
            "receiver" => Ok(Self::Receiver),
            other => Err(RoutingConfigError::InvalidMode(other.to_string())),
        }
    }

    fn act_as_proxy(self) -> bool {
        matches!(self, Self::Caller)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompiledTarget {
    target_type: RuleTargetType,
    url: Option<String>,
    publisher_id: Option<String>,
    exclude_action: bool,
}

/// Compiled routing index; immutable after build, safe for concurrent reads.
#[derive(Debug)]
pub struct RoutingEngine {
    v1: HashMap<(String, String, String), CompiledTarget>,
    v2: HashMap<(String, String), CompiledTarget>,
    act_as_proxy: bool,
}

impl RoutingEngine {
    pub fn new(
        rules: &[RoutingRule],
        direction: RoutingDirection,
    ) -> Result<Self, RoutingConfigError> {
        let mut v1 = HashMap::new();
        let mut v2 = HashMap::new();

        for rule in rules {
            let target = compile_target(rule)?;
            if rule.is_v2() {
                if let Some(domain) = &rule.domain {
                    warn!(
                        version = %rule.version,
                        domain = %domain,
                        "Ignoring domain on v2 routing rule; v2 resolution is domain-agnostic"
                    );
                }
                for action in &rule.endpoints {
                    let key = (rule.version.clone(), action.clone());
                    if v2.insert(key, target.clone()).is_some() {
                        return Err(RoutingConfigError::DuplicateV2 {
                            action: action.clone(),
                            version: rule.version.clone(),
                        });
                    }
                }
            } else {
                let domain = rule
                    .domain
                    .clone()
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| RoutingConfigError::MissingDomain {
                        version: rule.version.clone(),
                    })?;
                for action in &rule.endpoints {
                    let key = (rule.version.clone(), domain.clone(), action.clone());
                    if v1.insert(key, target.clone()).is_some() {
                        return Err(RoutingConfigError::DuplicateV1 {
                            action: action.clone(),
                            version: rule.version.clone(),
                            domain: domain.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            v1,
            v2,
            act_as_proxy: direction.act_as_proxy(),
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        direction: RoutingDirection,
    ) -> Result<Self, RoutingConfigError> {
        let file = RoutingConfigFile::from_path(path)?;
        Self::new(&file.routing_rules, direction)
    }

    /// Factory for the plugin manager. Config keys: `routingConfig` (path to
    /// the rules YAML) and `mode` (`caller` or `receiver`).
    pub fn load(cfg: &PluginConfig) -> Result<Loaded<dyn RouteResolver>, PluginError> {
        let path = cfg
            .config
            .get("routingConfig")
            .ok_or_else(|| to_plugin_err(RoutingConfigError::MissingConfigKey("routingConfig")))?;
        let mode = cfg
            .config
            .get("mode")
            .ok_or_else(|| to_plugin_err(RoutingConfigError::MissingConfigKey("mode")))?;
        let direction = RoutingDirection::parse(mode).map_err(to_plugin_err)?;
        let engine = Self::from_file(path, direction).map_err(to_plugin_err)?;
        Ok((Arc::new(engine), None))
    }

    fn lookup(
        &self,
        version: &str,
        domain: Option<&str>,
        action: &str,
    ) -> Option<&CompiledTarget> {
        if let Some(target) = self
            .v2
            .get(&(version.to_string(), action.to_string()))
        {
            return Some(target);
        }
        let domain = domain?;
        self.v1
            .get(&(version.to_string(), domain.to_string(), action.to_string()))
    }

    fn resolve(&self, uri: &Uri, body: &[u8]) -> Result<Route, ProtocolError> {
        let ctx = PayloadContext::extract(body);
        let version = ctx
            .effective_version()
            .ok_or_else(|| ProtocolError::bad_request("missing context.version in payload"))?;
        let action = ctx
            .action
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| last_path_segment(uri));

        let target = self
            .lookup(version, ctx.domain.as_deref(), &action)
            .ok_or_else(|| {
                ProtocolError::not_found(format!(
                    "no routing rule for version {version}, domain {}, endpoint {action}",
                    ctx.domain.as_deref().unwrap_or("-")
                ))
            })?;

        self.finalize(target, &ctx, &action)
    }

    fn finalize(
        &self,
        target: &CompiledTarget,
        ctx: &PayloadContext,
        action: &str,
    ) -> Result<Route, ProtocolError> {
        let route = match target.target_type {
            RuleTargetType::Url => {
                let base = target.url.as_deref().unwrap_or_default();
                let url = if target.exclude_action {
                    base.to_string()
                } else {
                    join_action(base, action)
                };
                url_route(url, self.act_as_proxy)
            }
            RuleTargetType::Bpp => {
                let uri = ctx
                    .bpp_uri
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .or_else(|| target.url.clone())
                    .ok_or_else(|| {
                        ProtocolError::bad_request(
                            "bpp_uri not found in payload and no fallback url configured",
                        )
                    })?;
                url_route(join_action(&uri, action), self.act_as_proxy)
            }
            RuleTargetType::Bap => {
                let uri = ctx
                    .bap_uri
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        ProtocolError::bad_request("bap_uri not found in payload")
                    })?;
                url_route(join_action(uri, action), self.act_as_proxy)
            }
            RuleTargetType::Msgq => Route {
                target_type: TargetType::Msgq,
                url: None,
                publisher_id: target.publisher_id.clone(),
                act_as_proxy: self.act_as_proxy,
            },
            RuleTargetType::Publisher => Route {
                target_type: TargetType::Publisher,
                url: None,
                publisher_id: target.publisher_id.clone(),
                act_as_proxy: self.act_as_proxy,
            },
        };
        Ok(route)
    }
}

#[async_trait]
impl RouteResolver for RoutingEngine {
    async fn route(&self, uri: &Uri, body: &[u8]) -> Result<Route, ProtocolError> {
        self.resolve(uri, body)
    }
}

fn compile_target(rule: &RoutingRule) -> Result<CompiledTarget, RoutingConfigError> {
    let target = &rule.target;
    match rule.target_type {
        RuleTargetType::Url if target.url.is_none() => {
            return Err(RoutingConfigError::MissingTargetField {
                version: rule.version.clone(),
                target_type: "url",
                field: "target.url",
            })
        }
        RuleTargetType::Bap if target.url.is_some() => {
            return Err(RoutingConfigError::BapFallback {
                version: rule.version.clone(),
            })
        }
        RuleTargetType::Msgq if target.topic_id.is_none() => {
            return Err(RoutingConfigError::MissingTargetField {
                version: rule.version.clone(),
                target_type: "msgq",
                field: "target.topicId",
            })
        }
        RuleTargetType::Publisher if target.publisher_id.is_none() => {
            return Err(RoutingConfigError::MissingTargetField {
                version: rule.version.clone(),
                target_type: "publisher",
                field: "target.publisherId",
            })
        }
        _ => {}
    }

    let publisher_id = match rule.target_type {
        RuleTargetType::Msgq => target.topic_id.clone(),
        RuleTargetType::Publisher => target.publisher_id.clone(),
        _ => None,
    };

    Ok(CompiledTarget {
        target_type: rule.target_type,
        url: target.url.clone(),
        publisher_id,
        exclude_action: target.exclude_action,
    })
}

fn url_route(url: String, act_as_proxy: bool) -> Route {
    Route {
        target_type: TargetType::Url,
        url: Some(url),
        publisher_id: None,
        act_as_proxy,
    }
}

fn join_action(base: &str, action: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), action)
}

fn last_path_segment(uri: &Uri) -> String {
    uri.path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn to_plugin_err(err: RoutingConfigError) -> PluginError {
    PluginError::InvalidConfig(err.to_string())
}
