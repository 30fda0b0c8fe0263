//! Core data model shared by the pipeline, routing engine, and dispatcher.

mod auth;
mod context;
mod error;

pub use auth::{AuthHeader, AuthHeaderError, SIGNATURE_VALIDITY_SECS};
pub use context::{
    PayloadContext, RequestSnapshot, Role, Route, StepContext, SubscriberId, TargetType,
    AUTH_HEADER_GATEWAY, AUTH_HEADER_SUBSCRIBER, HEADER_MODULE_NAME, HEADER_ROLE,
    UNAUTHORIZED_HEADER_GATEWAY, UNAUTHORIZED_HEADER_SUBSCRIBER,
};
pub use error::{ProtocolError, SchemaErrorItem, WorkbenchBehavior};
