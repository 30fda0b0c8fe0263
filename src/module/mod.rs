//! Module orchestration: per-module plugin loading, step construction, and
//! the per-request handler that runs the pipeline and dispatches the result.

mod dispatch;
pub mod hooks;
mod http;
mod instrument;
pub mod server;
mod steps;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Request;
use axum::http::header::HOST;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use http_body_util::BodyExt;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{ModuleConfig, PluginBindings, PluginConfig};
use crate::model::{
    ProtocolError, RequestSnapshot, Role, StepContext, SubscriberId, HEADER_MODULE_NAME,
    HEADER_ROLE,
};
use crate::observability::Metrics;
use crate::plugin::manager::Loaded;
use crate::plugin::{
    Cache, DisposeFn, KeyManager, Middleware, OndcValidator, OndcWorkbench, PluginError,
    PluginManager, Publisher, RouteResolver, SchemaValidator, SignValidator, Signer, Step,
    TransportWrapper,
};
use crate::response;

pub use hooks::{post_response_layer, PostResponseHooks};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to load {name} plugin ({id}): {source}")]
    PluginLoad {
        name: &'static str,
        id: String,
        #[source]
        source: PluginError,
    },

    #[error("failed to load {name} plugin ({id}): Cache plugin not configured")]
    NeedsCache { name: &'static str, id: String },

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] PluginError),

    #[error("invalid config for step '{step}': {capability} plugin not configured")]
    MissingCapability {
        step: String,
        capability: &'static str,
    },

    #[error("unrecognized step: {0}")]
    UnknownStep(String),

    #[error("custom step '{0}' collides with a built-in step name")]
    StepCollision(String),

    #[error("duplicate custom step id '{0}'")]
    DuplicateCustomStep(String),
}

/// Capability instances loaded for one module. A missing binding stays
/// `None`; steps that need it fail at build time. Cache and RegistryLookup
/// exist only as constructor dependencies of the other plugins and are not
/// kept past the load.
pub(crate) struct PluginSet {
    pub key_manager: Option<Arc<dyn KeyManager>>,
    pub sign_validator: Option<Arc<dyn SignValidator>>,
    pub signer: Option<Arc<dyn Signer>>,
    pub schema_validator: Option<Arc<dyn SchemaValidator>>,
    pub router: Option<Arc<dyn RouteResolver>>,
    pub publisher: Option<Arc<dyn Publisher>>,
    pub transport_wrapper: Option<Arc<dyn TransportWrapper>>,
    pub ondc_validator: Option<Arc<dyn OndcValidator>>,
    pub ondc_workbench: Option<Arc<dyn OndcWorkbench>>,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl PluginSet {
    /// Loads plugins in dependency order: Cache, Registry, KeyManager, then
    /// the rest. Dispose hooks accumulate in registration order.
    fn load(
        manager: &PluginManager,
        bindings: &PluginBindings,
        disposers: &mut Vec<DisposeFn>,
    ) -> Result<Self, BuildError> {
        let cache = load_plugin("Cache", &bindings.cache, disposers, |cfg| {
            manager.cache(cfg)
        })?;
        let registry = load_plugin("Registry", &bindings.registry, disposers, |cfg| {
            manager.registry(cfg)
        })?;

        let key_manager = match &bindings.key_manager {
            None => {
                debug!("Skipping KeyManager plugin: not configured");
                None
            }
            Some(cfg) => {
                let cache = cache.clone().ok_or_else(|| BuildError::NeedsCache {
                    name: "KeyManager",
                    id: cfg.id.clone(),
                })?;
                load_plugin("KeyManager", &bindings.key_manager, disposers, |cfg| {
                    manager.key_manager(cache.clone(), registry.clone(), cfg)
                })?
            }
        };

        let sign_validator =
            load_plugin("SignValidator", &bindings.sign_validator, disposers, |cfg| {
                manager.sign_validator(cfg)
            })?;
        let schema_validator = load_plugin(
            "SchemaValidator",
            &bindings.schema_validator,
            disposers,
            |cfg| manager.schema_validator(cfg),
        )?;
        let router = load_plugin("Router", &bindings.router, disposers, |cfg| {
            manager.router(cfg)
        })?;
        let publisher = load_plugin("Publisher", &bindings.publisher, disposers, |cfg| {
            manager.publisher(cfg)
        })?;
        let signer = load_plugin("Signer", &bindings.signer, disposers, |cfg| {
            manager.signer(cfg)
        })?;
        let transport_wrapper = load_plugin(
            "TransportWrapper",
            &bindings.transport_wrapper,
            disposers,
            |cfg| manager.transport_wrapper(cfg),
        )?;
        let ondc_validator = load_cache_bound(
            "OndcValidator",
            &bindings.ondc_validator,
            &cache,
            disposers,
            |cache, cfg| manager.ondc_validator(cache, cfg),
        )?;
        let ondc_workbench = load_cache_bound(
            "OndcWorkbench",
            &bindings.ondc_workbench,
            &cache,
            disposers,
            |cache, cfg| manager.ondc_workbench(cache, cfg),
        )?;

        let mut middleware = Vec::with_capacity(bindings.middleware.len());
        for mw_cfg in &bindings.middleware {
            let (mw, dispose) =
                manager
                    .middleware(mw_cfg)
                    .map_err(|source| BuildError::PluginLoad {
                        name: "Middleware",
                        id: mw_cfg.id.clone(),
                        source,
                    })?;
            if let Some(dispose) = dispose {
                disposers.push(dispose);
            }
            debug!(plugin = "Middleware", id = %mw_cfg.id, "Loaded plugin");
            middleware.push(mw);
        }

        debug!("All configured plugins loaded");
        Ok(Self {
            key_manager,
            sign_validator,
            signer,
            schema_validator,
            router,
            publisher,
            transport_wrapper,
            ondc_validator,
            ondc_workbench,
            middleware,
        })
    }
}

fn load_plugin<T: ?Sized>(
    name: &'static str,
    cfg: &Option<PluginConfig>,
    disposers: &mut Vec<DisposeFn>,
    factory: impl FnOnce(&PluginConfig) -> Result<Loaded<T>, PluginError>,
) -> Result<Option<Arc<T>>, BuildError> {
    let Some(cfg) = cfg else {
        debug!(plugin = name, "Skipping plugin: not configured");
        return Ok(None);
    };
    let (instance, dispose) = factory(cfg).map_err(|source| BuildError::PluginLoad {
        name,
        id: cfg.id.clone(),
        source,
    })?;
    if let Some(dispose) = dispose {
        disposers.push(dispose);
    }
    debug!(plugin = name, id = %cfg.id, "Loaded plugin");
    Ok(Some(instance))
}

fn load_cache_bound<T: ?Sized>(
    name: &'static str,
    cfg: &Option<PluginConfig>,
    cache: &Option<Arc<dyn Cache>>,
    disposers: &mut Vec<DisposeFn>,
    factory: impl FnOnce(Arc<dyn Cache>, &PluginConfig) -> Result<Loaded<T>, PluginError>,
) -> Result<Option<Arc<T>>, BuildError> {
    let Some(plugin_cfg) = cfg else {
        debug!(plugin = name, "Skipping plugin: not configured");
        return Ok(None);
    };
    let cache = cache.clone().ok_or_else(|| BuildError::NeedsCache {
        name,
        id: plugin_cfg.id.clone(),
    })?;
    load_plugin(name, cfg, disposers, |cfg| factory(cache, cfg))
}

/// One mounted handler endpoint: owns its plugins and steps, serves one
/// HTTP path prefix, and releases everything at shutdown.
pub struct Module {
    name: String,
    path: String,
    role: Role,
    subscriber_id: String,
    middleware: Vec<Arc<dyn Middleware>>,
    steps: Vec<Arc<dyn Step>>,
    publisher: Option<Arc<dyn Publisher>>,
    http_client: reqwest::Client,
    delivery_timeout: Option<Duration>,
    metrics: Arc<Metrics>,
    disposers: Mutex<Vec<DisposeFn>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("role", &self.role)
            .field("subscriber_id", &self.subscriber_id)
            .finish_non_exhaustive()
    }
}

impl Module {
    pub fn build(
        manager: &PluginManager,
        cfg: &ModuleConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, BuildError> {
        let handler = &cfg.handler;
        let mut disposers = Vec::new();

        let plugins = PluginSet::load(manager, &handler.plugins, &mut disposers)?;

        // Client comes after the plugins so the transport wrapper applies.
        let http_client =
            http::build_client(&handler.http_client_config, plugins.transport_wrapper.as_ref())
                .map_err(BuildError::HttpClient)?;

        let mut custom: HashMap<String, Arc<dyn Step>> = HashMap::new();
        for step_cfg in &handler.plugins.steps {
            if steps::is_builtin(&step_cfg.id) {
                return Err(BuildError::StepCollision(step_cfg.id.clone()));
            }
            if custom.contains_key(&step_cfg.id) {
                return Err(BuildError::DuplicateCustomStep(step_cfg.id.clone()));
            }
            let (step, dispose) =
                manager.step(step_cfg).map_err(|source| BuildError::PluginLoad {
                    name: "Step",
                    id: step_cfg.id.clone(),
                    source,
                })?;
            if let Some(dispose) = dispose {
                disposers.push(dispose);
            }
            custom.insert(step_cfg.id.clone(), step);
        }

        let steps = steps::build_steps(
            &handler.steps,
            &plugins,
            &custom,
            &cfg.name,
            metrics.clone(),
        )?;

        Ok(Self {
            name: cfg.name.clone(),
            path: cfg.path.clone(),
            role: handler.role,
            subscriber_id: handler.subscriber_id.clone().unwrap_or_default(),
            middleware: plugins.middleware,
            steps,
            publisher: plugins.publisher,
            http_client,
            delivery_timeout: handler.http_client_config.delivery_timeout(),
            metrics,
            disposers: Mutex::new(disposers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Processes one inbound request: drain the body, run the pipeline,
    /// dispatch per the resolved route, encode errors as NACK.
    pub async fn handle(&self, req: Request) -> Response {
        self.metrics.request();

        let mut req = req;
        for middleware in &self.middleware {
            req = match middleware.handle(req).await {
                Ok(req) => req,
                Err(resp) => return resp,
            };
        }

        let hooks = req.extensions().get::<PostResponseHooks>().cloned();
        let sub_override = req.extensions().get::<SubscriberId>().cloned();

        let (parts, body) = req.into_parts();
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let mut headers = parts.headers;
        stamp_internal(&mut headers, &self.name, self.role);

        // The original stream is consumed exactly once; from here on the
        // buffer is the authoritative payload.
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes().to_vec(),
            Err(e) => {
                let err = ProtocolError::bad_request(format!("failed to read request body: {e}"));
                error!(module = %self.name, %err, "Request rejected");
                return response::nack(&err, None);
            }
        };

        let sub_id = sub_override
            .map(|s| s.0)
            .unwrap_or_else(|| self.subscriber_id.clone());

        let snapshot = RequestSnapshot {
            method: parts.method,
            uri: parts.uri,
            headers,
            host,
        };
        let mut ctx = StepContext::new(snapshot, body, self.role, sub_id);
        let request_id = uuid::Uuid::now_v7();
        debug!(
            module = %self.name,
            %request_id,
            method = %ctx.request.method,
            uri = %ctx.request.uri,
            body_len = ctx.body.len(),
            "Handling request"
        );

        for step in &self.steps {
            if let Err(err) = step.run(&mut ctx).await {
                error!(module = %self.name, %err, "Step failed");
                let mut resp = response::nack(&err, ctx.message_id.as_deref());
                append_headers(&mut resp, &ctx.resp_headers);
                return resp;
            }
        }

        // Internal instrumentation headers stop here; never forwarded.
        strip_internal(&mut ctx.request.headers);

        let resp_headers = ctx.resp_headers.clone();
        let mut resp = dispatch::dispatch(
            ctx,
            self.http_client.clone(),
            self.publisher.clone(),
            hooks,
            self.delivery_timeout,
        )
        .await;
        append_headers(&mut resp, &resp_headers);
        resp
    }

    /// Invokes plugin dispose hooks in reverse registration order.
    pub fn dispose(&self) {
        let mut disposers = self
            .disposers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Some(dispose) = disposers.pop() {
            dispose();
        }
        debug!(module = %self.name, "Module disposed");
    }
}

fn stamp_internal(headers: &mut axum::http::HeaderMap, module: &str, role: Role) {
    if let Ok(value) = HeaderValue::from_str(module) {
        headers.insert(HeaderName::from_static(HEADER_MODULE_NAME), value);
    }
    headers.insert(
        HeaderName::from_static(HEADER_ROLE),
        HeaderValue::from_static(role.as_str()),
    );
}

fn strip_internal(headers: &mut axum::http::HeaderMap) {
    headers.remove(HEADER_MODULE_NAME);
    headers.remove(HEADER_ROLE);
}

fn append_headers(resp: &mut Response, extra: &axum::http::HeaderMap) {
    for (name, value) in extra {
        resp.headers_mut().append(name.clone(), value.clone());
    }
}
