use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::routing::RoutingEngine;

use super::definition::{
    Cache, DisposeFn, KeyManager, Middleware, OndcValidator, OndcWorkbench, PluginError,
    Publisher, RegistryLookup, RouteResolver, SchemaValidator, SignValidator, Signer, Step,
    TransportWrapper,
};
use super::memcache::InMemoryCache;

/// A constructed plugin instance plus its optional tear-down hook.
pub type Loaded<T> = (Arc<T>, Option<DisposeFn>);

pub type CacheFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn Cache>, PluginError> + Send + Sync>;
pub type RegistryFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn RegistryLookup>, PluginError> + Send + Sync>;
pub type KeyManagerFactory = Box<
    dyn Fn(
            Arc<dyn Cache>,
            Option<Arc<dyn RegistryLookup>>,
            &PluginConfig,
        ) -> Result<Loaded<dyn KeyManager>, PluginError>
        + Send
        + Sync,
>;
pub type SignValidatorFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn SignValidator>, PluginError> + Send + Sync>;
pub type SignerFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn Signer>, PluginError> + Send + Sync>;
pub type SchemaValidatorFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn SchemaValidator>, PluginError> + Send + Sync>;
pub type RouterFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn RouteResolver>, PluginError> + Send + Sync>;
pub type PublisherFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn Publisher>, PluginError> + Send + Sync>;
pub type TransportWrapperFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn TransportWrapper>, PluginError> + Send + Sync>;
pub type OndcValidatorFactory = Box<
    dyn Fn(Arc<dyn Cache>, &PluginConfig) -> Result<Loaded<dyn OndcValidator>, PluginError>
        + Send
        + Sync,
>;
pub type OndcWorkbenchFactory = Box<
    dyn Fn(Arc<dyn Cache>, &PluginConfig) -> Result<Loaded<dyn OndcWorkbench>, PluginError>
        + Send
        + Sync,
>;
pub type MiddlewareFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn Middleware>, PluginError> + Send + Sync>;
pub type StepFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Loaded<dyn Step>, PluginError> + Send + Sync>;

/// Id-keyed factory table for one capability.
struct FactoryMap<F> {
    factories: HashMap<String, F>,
}

impl<F> Default for FactoryMap<F> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<F> FactoryMap<F> {
    fn register(&mut self, id: impl Into<String>, factory: F) -> Result<(), PluginError> {
        let id = id.into();
        if self.factories.contains_key(&id) {
            return Err(PluginError::DuplicateId(id));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<&F, PluginError> {
        self.factories
            .get(id)
            .ok_or_else(|| PluginError::UnknownId(id.to_string()))
    }
}

/// Registry mapping plugin ids to typed capability factories.
///
/// Ids are opaque; an id selects both the capability type and the concrete
/// implementation. Unknown ids and double registrations are fatal at build
/// time. Instances constructed through the manager are owned by the module
/// that requested them.
#[derive(Default)]
pub struct PluginManager {
    cache: FactoryMap<CacheFactory>,
    registry: FactoryMap<RegistryFactory>,
    key_manager: FactoryMap<KeyManagerFactory>,
    sign_validator: FactoryMap<SignValidatorFactory>,
    signer: FactoryMap<SignerFactory>,
    schema_validator: FactoryMap<SchemaValidatorFactory>,
    router: FactoryMap<RouterFactory>,
    publisher: FactoryMap<PublisherFactory>,
    transport_wrapper: FactoryMap<TransportWrapperFactory>,
    ondc_validator: FactoryMap<OndcValidatorFactory>,
    ondc_workbench: FactoryMap<OndcWorkbenchFactory>,
    middleware: FactoryMap<MiddlewareFactory>,
    step: FactoryMap<StepFactory>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager pre-loaded with the first-party plugins: the in-memory TTL
    /// cache and the routing engine.
    pub fn with_defaults() -> Self {
        let mut mgr = Self::new();
        let cache = mgr.register_cache("inmemorycache", Box::new(InMemoryCache::load));
        let router = mgr.register_router("router", Box::new(RoutingEngine::load));
        if let Err(err) = cache.and(router) {
            unreachable!("built-in plugin ids collide: {err}");
        }
        mgr
    }

    pub fn register_cache(&mut self, id: &str, f: CacheFactory) -> Result<(), PluginError> {
        self.cache.register(id, f)
    }

    pub fn register_registry(&mut self, id: &str, f: RegistryFactory) -> Result<(), PluginError> {
        self.registry.register(id, f)
    }

    pub fn register_key_manager(
        &mut self,
        id: &str,
        f: KeyManagerFactory,
    ) -> Result<(), PluginError> {
        self.key_manager.register(id, f)
    }

    pub fn register_sign_validator(
        &mut self,
        id: &str,
        f: SignValidatorFactory,
    ) -> Result<(), PluginError> {
        self.sign_validator.register(id, f)
    }

    pub fn register_signer(&mut self, id: &str, f: SignerFactory) -> Result<(), PluginError> {
        self.signer.register(id, f)
    }

    pub fn register_schema_validator(
        &mut self,
        id: &str,
        f: SchemaValidatorFactory,
    ) -> Result<(), PluginError> {
        self.schema_validator.register(id, f)
    }

    pub fn register_router(&mut self, id: &str, f: RouterFactory) -> Result<(), PluginError> {
        self.router.register(id, f)
    }

    pub fn register_publisher(&mut self, id: &str, f: PublisherFactory) -> Result<(), PluginError> {
        self.publisher.register(id, f)
    }

    pub fn register_transport_wrapper(
        &mut self,
        id: &str,
        f: TransportWrapperFactory,
    ) -> Result<(), PluginError> {
        self.transport_wrapper.register(id, f)
    }

    pub fn register_ondc_validator(
        &mut self,
        id: &str,
        f: OndcValidatorFactory,
    ) -> Result<(), PluginError> {
        self.ondc_validator.register(id, f)
    }

    pub fn register_ondc_workbench(
        &mut self,
        id: &str,
        f: OndcWorkbenchFactory,
    ) -> Result<(), PluginError> {
        self.ondc_workbench.register(id, f)
    }

    pub fn register_middleware(
        &mut self,
        id: &str,
        f: MiddlewareFactory,
    ) -> Result<(), PluginError> {
        self.middleware.register(id, f)
    }

    pub fn register_step(&mut self, id: &str, f: StepFactory) -> Result<(), PluginError> {
        self.step.register(id, f)
    }

    pub fn cache(&self, cfg: &PluginConfig) -> Result<Loaded<dyn Cache>, PluginError> {
        self.cache.get(&cfg.id)?(cfg)
    }

    pub fn registry(&self, cfg: &PluginConfig) -> Result<Loaded<dyn RegistryLookup>, PluginError> {
        self.registry.get(&cfg.id)?(cfg)
    }

    pub fn key_manager(
        &self,
        cache: Arc<dyn Cache>,
        registry: Option<Arc<dyn RegistryLookup>>,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn KeyManager>, PluginError> {
        self.key_manager.get(&cfg.id)?(cache, registry, cfg)
    }

    pub fn sign_validator(
        &self,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn SignValidator>, PluginError> {
        self.sign_validator.get(&cfg.id)?(cfg)
    }

    pub fn signer(&self, cfg: &PluginConfig) -> Result<Loaded<dyn Signer>, PluginError> {
        self.signer.get(&cfg.id)?(cfg)
    }

    pub fn schema_validator(
        &self,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn SchemaValidator>, PluginError> {
        self.schema_validator.get(&cfg.id)?(cfg)
    }

    pub fn router(&self, cfg: &PluginConfig) -> Result<Loaded<dyn RouteResolver>, PluginError> {
        self.router.get(&cfg.id)?(cfg)
    }

    pub fn publisher(&self, cfg: &PluginConfig) -> Result<Loaded<dyn Publisher>, PluginError> {
        self.publisher.get(&cfg.id)?(cfg)
    }

    pub fn transport_wrapper(
        &self,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn TransportWrapper>, PluginError> {
        self.transport_wrapper.get(&cfg.id)?(cfg)
    }

    pub fn ondc_validator(
        &self,
        cache: Arc<dyn Cache>,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn OndcValidator>, PluginError> {
        self.ondc_validator.get(&cfg.id)?(cache, cfg)
    }

    pub fn ondc_workbench(
        &self,
        cache: Arc<dyn Cache>,
        cfg: &PluginConfig,
    ) -> Result<Loaded<dyn OndcWorkbench>, PluginError> {
        self.ondc_workbench.get(&cfg.id)?(cache, cfg)
    }

    pub fn middleware(&self, cfg: &PluginConfig) -> Result<Loaded<dyn Middleware>, PluginError> {
        self.middleware.get(&cfg.id)?(cfg)
    }

    pub fn step(&self, cfg: &PluginConfig) -> Result<Loaded<dyn Step>, PluginError> {
        self.step.get(&cfg.id)?(cfg)
    }
}
