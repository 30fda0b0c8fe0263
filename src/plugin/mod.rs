//! Plugin system: typed capabilities, the id-to-factory manager, and the
//! first-party implementations the adapter ships with.
//!
//! Each capability is its own trait; there is no single god-interface.
//! Dependency wiring is explicit: the KeyManager factory receives Cache and
//! RegistryLookup instances, the ONDC factories receive Cache. Everything a
//! deployment plugs in (Redis, Vault, JSON-Schema validators, queue
//! publishers) implements one of these traits and registers a factory under
//! an id; modules bind ids in their config.

pub mod definition;
pub mod manager;
pub mod memcache;

pub use definition::{
    Cache, DisposeFn, KeyManager, KeySet, Middleware, OndcValidator, OndcWorkbench, PluginError,
    Publisher, RegistryLookup, RouteResolver, SchemaValidator, SignValidator, Signer, Step,
    Subscription, TransportWrapper,
};
pub use manager::PluginManager;
