use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Uri;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ProtocolError, RequestSnapshot, Route, StepContext};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is not registered")]
    UnknownId(String),
    #[error("plugin '{0}' is already registered")]
    DuplicateId(String),
    #[error("invalid plugin config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Operation(String),
}

impl PluginError {
    pub fn operation(cause: impl std::fmt::Display) -> Self {
        Self::Operation(cause.to_string())
    }
}

/// Tear-down hook returned by a factory; the owning module invokes these in
/// reverse registration order at shutdown.
pub type DisposeFn = Box<dyn FnOnce() + Send>;

/// Signing key material for one subscriber.
#[derive(Debug, Clone)]
pub struct KeySet {
    pub unique_key_id: String,
    pub signing_private: String,
}

/// One registry entry for a network participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: String,
    pub unique_key_id: String,
    pub signing_public_key: String,
    #[serde(default)]
    pub subscriber_url: Option<String>,
}

/// Key/value cache with optional per-entry TTL. Implementations must be safe
/// for concurrent use; the core never caches negative results through it.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PluginError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PluginError>;
    async fn delete(&self, key: &str) -> Result<(), PluginError>;
}

/// Network registry lookup for participant key material.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn lookup(
        &self,
        subscriber_id: &str,
        unique_key_id: &str,
    ) -> Result<Vec<Subscription>, PluginError>;
}

/// Key store facade: private keys for signing, public keys for verification.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn keyset(&self, subscriber_id: &str) -> Result<KeySet, PluginError>;
    async fn signing_public_key(
        &self,
        subscriber_id: &str,
        unique_key_id: &str,
    ) -> Result<String, PluginError>;
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(
        &self,
        body: &[u8],
        private_key: &str,
        created: i64,
        expires: i64,
    ) -> Result<String, PluginError>;
}

#[async_trait]
pub trait SignValidator: Send + Sync {
    async fn validate(
        &self,
        body: &[u8],
        header: &str,
        public_key: &str,
    ) -> Result<(), PluginError>;
}

/// Payload validation against the Beckn schema set. Returns the typed
/// taxonomy directly so per-field reports survive to the response encoder.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate(&self, uri: &Uri, body: &[u8]) -> Result<(), ProtocolError>;
}

/// Routing decision: (request URL, payload) to a delivery target.
#[async_trait]
pub trait RouteResolver: Send + Sync {
    async fn route(&self, uri: &Uri, body: &[u8]) -> Result<Route, ProtocolError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError>;
}

/// Hook for cross-cutting concerns on the module's outbound HTTP client.
pub trait TransportWrapper: Send + Sync {
    fn wrap(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder;
}

/// Pre-pipeline hook around a module handler. Middlewares run in binding
/// order before the body is drained; each may rewrite the request (e.g.
/// install a subscriber-id extension) or short-circuit with a response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: Request) -> Result<Request, Response>;
}

#[async_trait]
pub trait OndcValidator: Send + Sync {
    async fn validate_payload(&self, uri: &Uri, body: &[u8]) -> Result<(), ProtocolError>;
    async fn save_validation_data(&self, uri: &Uri, body: &[u8]) -> Result<(), ProtocolError>;
}

#[async_trait]
pub trait OndcWorkbench: Send + Sync {
    async fn workbench_receiver(
        &self,
        request: &RequestSnapshot,
        body: &[u8],
    ) -> Result<(), ProtocolError>;
    async fn workbench_validate_context(
        &self,
        request: &RequestSnapshot,
        body: &[u8],
    ) -> Result<(), ProtocolError>;
}

/// One unit of the request pipeline. Built-ins and custom plugin steps share
/// this trait; the executor runs them strictly in configured order.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError>;
}
