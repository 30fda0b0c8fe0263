use axum::http::header::COOKIE;
use axum::http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};

/// Network role a module plays on behalf of its participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Bap,
    Bpp,
    Gateway,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Bap => "bap",
            Role::Bpp => "bpp",
            Role::Gateway => "gateway",
        }
    }
}

/// Subscriber-class auth header, shared by request and challenge response.
pub const AUTH_HEADER_SUBSCRIBER: &str = "authorization";
/// Gateway-class auth header, distinct from the subscriber-class one.
pub const AUTH_HEADER_GATEWAY: &str = "x-gateway-authorization";
pub const UNAUTHORIZED_HEADER_SUBSCRIBER: &str = "www-authenticate";
pub const UNAUTHORIZED_HEADER_GATEWAY: &str = "proxy-authenticate";

/// Internal instrumentation headers; stamped on ingress, never forwarded.
pub const HEADER_MODULE_NAME: &str = "x-module-name";
pub const HEADER_ROLE: &str = "x-role";

/// Where a finalized request gets delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Url,
    Bpp,
    Bap,
    Msgq,
    Publisher,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Url => "url",
            TargetType::Bpp => "bpp",
            TargetType::Bap => "bap",
            TargetType::Msgq => "msgq",
            TargetType::Publisher => "publisher",
        }
    }
}

/// Resolved delivery target for one request.
///
/// Value-typed once handed to the dispatcher; the routing engine resolves
/// `bpp`/`bap` rules down to a concrete `url` target before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target_type: TargetType,
    pub url: Option<String>,
    pub publisher_id: Option<String>,
    pub act_as_proxy: bool,
}

/// Request extension carrying a subscriber id resolved upstream of the
/// module handler (middleware plugins may install it).
#[derive(Debug, Clone)]
pub struct SubscriberId(pub String);

/// Immutable view of the inbound request taken before the pipeline runs.
///
/// The original body stream is consumed exactly once into `StepContext::body`;
/// everything the steps and the dispatcher need afterwards lives here.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub host: String,
}

impl RequestSnapshot {
    /// Returns the value of a request cookie, if present.
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                if let Some((k, v)) = pair.split_once('=') {
                    if k.trim() == name {
                        return Some(v.trim().to_string());
                    }
                }
            }
        }
        None
    }

    /// Last path segment of the request URL (the Beckn action).
    pub fn action(&self) -> &str {
        self.uri.path().rsplit('/').next().unwrap_or_default()
    }
}

/// Per-request mutable envelope threaded through the pipeline steps.
///
/// Owned by one pipeline invocation; steps receive `&mut StepContext` and
/// must not retain it past their `run` call.
pub struct StepContext {
    pub request: RequestSnapshot,
    pub body: Vec<u8>,
    pub role: Role,
    pub sub_id: String,
    /// Response-header sink; applied to the client response even when a
    /// step fails (signature challenges rely on this).
    pub resp_headers: HeaderMap,
    pub route: Option<Route>,
    pub message_id: Option<String>,
}

impl StepContext {
    pub fn new(request: RequestSnapshot, body: Vec<u8>, role: Role, sub_id: String) -> Self {
        let message_id = PayloadContext::extract(&body).message_id;
        Self {
            request,
            body,
            role,
            sub_id,
            resp_headers: HeaderMap::new(),
            route: None,
            message_id,
        }
    }
}

/// The `context` block of a Beckn payload, as far as the adapter reads it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadContext {
    pub domain: Option<String>,
    pub version: Option<String>,
    pub core_version: Option<String>,
    pub action: Option<String>,
    pub bap_uri: Option<String>,
    pub bpp_uri: Option<String>,
    pub message_id: Option<String>,
}

impl PayloadContext {
    /// Best-effort extraction; an unparsable body yields an empty context.
    pub fn extract(body: &[u8]) -> Self {
        #[derive(Deserialize, Default)]
        struct Envelope {
            #[serde(default)]
            context: PayloadContext,
        }
        serde_json::from_slice::<Envelope>(body)
            .map(|e| e.context)
            .unwrap_or_default()
    }

    /// Protocol version, falling back to the legacy `core_version` field.
    pub fn effective_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .filter(|v| !v.is_empty())
            .or(self.core_version.as_deref().filter(|v| !v.is_empty()))
    }
}
