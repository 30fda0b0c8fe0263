//! End-to-end tests for the adapter pipeline.
//!
//! Each test builds a full module from config with mock plugins where a real
//! deployment would bind external implementations, mounts it on the router,
//! and drives it with `oneshot` requests. Upstream participants are real
//! local HTTP servers so the proxy and async delivery paths are exercised
//! over the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

use beckn_onix::config::{
    AppConfig, HandlerConfig, HttpClientConfig, ModuleConfig, PluginBindings, PluginConfig,
};
use beckn_onix::model::{
    AuthHeader, ProtocolError, Role, SchemaErrorItem, StepContext, SubscriberId,
};
use beckn_onix::module::server::build_router;
use beckn_onix::observability::Metrics;
use beckn_onix::plugin::{
    KeyManager, KeySet, Middleware, PluginError, PluginManager, Publisher, SchemaValidator,
    SignValidator, Signer, Step,
};

// ---------------------------------------------------------------------------
// Mock plugins
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    key_lookups: AtomicUsize,
    sign_validations: AtomicUsize,
}

struct MockKeyManager {
    counters: Arc<Counters>,
}

#[async_trait]
impl KeyManager for MockKeyManager {
    async fn keyset(&self, _subscriber_id: &str) -> Result<KeySet, PluginError> {
        self.counters.key_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(KeySet {
            unique_key_id: "key-1".to_string(),
            signing_private: "test-private-key".to_string(),
        })
    }

    async fn signing_public_key(
        &self,
        _subscriber_id: &str,
        _unique_key_id: &str,
    ) -> Result<String, PluginError> {
        self.counters.key_lookups.fetch_add(1, Ordering::SeqCst);
        Ok("test-public-key".to_string())
    }
}

struct MockSigner;

#[async_trait]
impl Signer for MockSigner {
    async fn sign(
        &self,
        _body: &[u8],
        _private_key: &str,
        _created: i64,
        _expires: i64,
    ) -> Result<String, PluginError> {
        Ok("test-signature".to_string())
    }
}

struct MockSignValidator {
    counters: Arc<Counters>,
}

#[async_trait]
impl SignValidator for MockSignValidator {
    async fn validate(
        &self,
        _body: &[u8],
        header: &str,
        _public_key: &str,
    ) -> Result<(), PluginError> {
        self.counters.sign_validations.fetch_add(1, Ordering::SeqCst);
        if header.contains("forged") {
            return Err(PluginError::operation("signature digest mismatch"));
        }
        Ok(())
    }
}

/// Accepts any JSON carrying `context.transaction_id`; reports a per-field
/// error otherwise.
struct MockSchemaValidator;

#[async_trait]
impl SchemaValidator for MockSchemaValidator {
    async fn validate(&self, _uri: &Uri, body: &[u8]) -> Result<(), ProtocolError> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::bad_request(format!("failed to parse JSON payload: {e}")))?;
        if payload["context"]["transaction_id"].is_string() {
            Ok(())
        } else {
            Err(ProtocolError::SchemaValidation(vec![SchemaErrorItem {
                paths: "context.transaction_id".to_string(),
                message: "missing required field".to_string(),
            }]))
        }
    }
}

struct CapturePublisher {
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

#[async_trait]
impl Publisher for CapturePublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError> {
        self.tx
            .send((topic.to_string(), payload.to_vec()))
            .map_err(|e| PluginError::operation(e))
    }
}

struct RecordingStep {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

#[async_trait]
impl Step for RecordingStep {
    async fn run(&self, _ctx: &mut StepContext) -> Result<(), ProtocolError> {
        self.log.lock().unwrap().push(self.label);
        if self.fail {
            return Err(ProtocolError::bad_request("recording step configured to fail"));
        }
        Ok(())
    }
}

/// Installs a subscriber-id request extension, the way a tenant-resolution
/// middleware would.
struct SubscriberMiddleware {
    subscriber_id: &'static str,
}

#[async_trait]
impl Middleware for SubscriberMiddleware {
    async fn handle(
        &self,
        mut req: Request,
    ) -> Result<Request, axum::response::Response> {
        req.extensions_mut()
            .insert(SubscriberId(self.subscriber_id.to_string()));
        Ok(req)
    }
}

struct RecordSubIdStep {
    seen: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Step for RecordSubIdStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        *self.seen.lock().unwrap() = Some(ctx.sub_id.clone());
        Ok(())
    }
}

struct RewriteBodyStep {
    new_body: Vec<u8>,
}

#[async_trait]
impl Step for RewriteBodyStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        ctx.body = self.new_body.clone();
        Ok(())
    }
}

fn manager_with_mocks(counters: Arc<Counters>) -> PluginManager {
    let mut manager = PluginManager::with_defaults();

    let km_counters = counters.clone();
    manager
        .register_key_manager(
            "mockkeys",
            Box::new(move |_cache, _registry, _cfg| {
                let km: Arc<dyn KeyManager> = Arc::new(MockKeyManager {
                    counters: km_counters.clone(),
                });
                Ok((km, None))
            }),
        )
        .unwrap();

    manager
        .register_signer(
            "mocksigner",
            Box::new(|_cfg| {
                let signer: Arc<dyn Signer> = Arc::new(MockSigner);
                Ok((signer, None))
            }),
        )
        .unwrap();

    let sv_counters = counters.clone();
    manager
        .register_sign_validator(
            "mocksignvalidator",
            Box::new(move |_cfg| {
                let validator: Arc<dyn SignValidator> = Arc::new(MockSignValidator {
                    counters: sv_counters.clone(),
                });
                Ok((validator, None))
            }),
        )
        .unwrap();

    manager
        .register_schema_validator(
            "mockschemavalidator",
            Box::new(|_cfg| {
                let validator: Arc<dyn SchemaValidator> = Arc::new(MockSchemaValidator);
                Ok((validator, None))
            }),
        )
        .unwrap();

    manager
}

// ---------------------------------------------------------------------------
// Config and upstream helpers
// ---------------------------------------------------------------------------

fn plugin(id: &str) -> PluginConfig {
    PluginConfig {
        id: id.to_string(),
        config: HashMap::new(),
    }
}

fn router_plugin(rules_path: &str, mode: &str) -> PluginConfig {
    PluginConfig {
        id: "router".to_string(),
        config: HashMap::from([
            ("routingConfig".to_string(), rules_path.to_string()),
            ("mode".to_string(), mode.to_string()),
        ]),
    }
}

fn module(name: &str, path: &str, steps: &[&str], plugins: PluginBindings) -> ModuleConfig {
    ModuleConfig {
        name: name.to_string(),
        path: path.to_string(),
        handler: HandlerConfig {
            role: Role::Bap,
            subscriber_id: Some("bap.example.com".to_string()),
            http_client_config: HttpClientConfig::default(),
            plugins,
            steps: steps.iter().map(|s| s.to_string()).collect(),
        },
    }
}

fn app_config(modules: Vec<ModuleConfig>) -> AppConfig {
    AppConfig {
        app_name: "onix-test".to_string(),
        http: Default::default(),
        log: Default::default(),
        modules,
    }
}

fn write_rules(dir: &TempDir, yaml: &str) -> String {
    let path = dir.path().join("routing.yaml");
    std::fs::write(&path, yaml).unwrap();
    path.to_str().unwrap().to_string()
}

fn beckn_body(version: &str, domain: &str, action: &str) -> serde_json::Value {
    json!({
        "context": {
            "version": version,
            "domain": domain,
            "action": action,
            "bap_id": "b",
            "bap_uri": "http://b",
            "transaction_id": "t",
            "message_id": "m",
            "timestamp": "2024-01-01T00:00:00Z"
        },
        "message": {}
    })
}

fn post(path: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

struct Received {
    method: String,
    path: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Local upstream participant; echoes an ACK and records what it received.
async fn spawn_backend() -> (String, mpsc::UnboundedReceiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let app = Router::new().fallback(move |req: Request| {
        let tx = tx.clone();
        async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes().to_vec();
            let _ = tx.send(Received {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                headers: parts.headers,
                body,
            });
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"message":{"ack":{"status":"ACK"}}}"#,
            )
                .into_response()
        }
    });

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    (format!("http://{addr}"), rx)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn recv_within(
    rx: &mut mpsc::UnboundedReceiver<Received>,
    what: &str,
) -> Received {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("{what} not received in time"))
        .expect("channel closed")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_proxy_forwards_signed_request() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: {backend_url}/api
    endpoints: [search]
"#
        ),
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["validateSchema", "addRoute", "sign"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            key_manager: Some(plugin("mockkeys")),
            signer: Some(plugin("mocksigner")),
            schema_validator: Some(plugin("mockschemavalidator")),
            router: Some(router_plugin(&rules, "caller")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let request_body = beckn_body("1.1.0", "retail:1.1.0", "search");
    let resp = app
        .oneshot(post("/bap/caller/search", &request_body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "ACK");

    let received = recv_within(&mut backend_rx, "proxied request").await;
    assert_eq!(received.method, "POST");
    assert_eq!(received.path, "/api/search");
    assert_eq!(received.body, serde_json::to_vec(&request_body).unwrap());

    let auth = received
        .headers
        .get(header::AUTHORIZATION)
        .expect("authorization header forwarded")
        .to_str()
        .unwrap()
        .to_string();
    let parsed = AuthHeader::parse(&auth).unwrap();
    assert_eq!(parsed.subscriber_id, "bap.example.com");
    assert_eq!(parsed.unique_key_id, "key-1");
    assert_eq!(parsed.algorithm, "ed25519");
    assert_eq!(parsed.signature, "test-signature");
    assert_eq!(parsed.expires - parsed.created, 300);

    // Internal instrumentation headers never leave the process.
    assert!(received.headers.get("x-module-name").is_none());
    assert!(received.headers.get("x-role").is_none());
}

#[tokio::test]
async fn async_receiver_acks_then_delivers() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: {backend_url}/api
    endpoints: [on_search]
"#
        ),
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnReceiver",
        "/bap/receiver",
        &["validateSign", "validateSchema", "addRoute"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            key_manager: Some(plugin("mockkeys")),
            sign_validator: Some(plugin("mocksignvalidator")),
            schema_validator: Some(plugin("mockschemavalidator")),
            router: Some(router_plugin(&rules, "receiver")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let request_body = beckn_body("1.1.0", "retail:1.1.0", "on_search");
    let auth = AuthHeader::build("bpp.example.com", "key-9", 1700000000, 1700000300, "valid-sig");
    let req = Request::builder()
        .method("POST")
        .uri("/bap/receiver/on_search")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, auth)
        .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();

    // Client is acked immediately; delivery happens after the response.
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "ACK");

    let received = recv_within(&mut backend_rx, "async delivery").await;
    assert_eq!(received.method, "POST");
    assert_eq!(received.path, "/api/on_search");
    assert_eq!(received.body, serde_json::to_vec(&request_body).unwrap());
    assert_eq!(
        received.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(counters.sign_validations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn signature_failure_rejects_before_routing() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: {backend_url}/api
    endpoints: [on_search]
"#
        ),
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnReceiver",
        "/bap/receiver",
        &["validateSign", "validateSchema", "addRoute"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            key_manager: Some(plugin("mockkeys")),
            sign_validator: Some(plugin("mocksignvalidator")),
            schema_validator: Some(plugin("mockschemavalidator")),
            router: Some(router_plugin(&rules, "receiver")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics.clone()).unwrap();

    let request_body = beckn_body("1.1.0", "retail:1.1.0", "on_search");
    let auth = AuthHeader::build("bpp.example.com", "key-9", 1700000000, 1700000300, "forged");
    let req = Request::builder()
        .method("POST")
        .uri("/bap/receiver/on_search")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, auth)
        .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.headers().get("proxy-authenticate").unwrap(),
        "Signature realm=\"bap.example.com\",headers=\"(created) (expires) digest\""
    );
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "NACK");

    // Pipeline aborted before addRoute: no routing decision, no upstream call.
    assert!(metrics.snapshot().routing_decisions.is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend_rx.try_recv().is_err());
}

#[tokio::test]
async fn schema_failure_nacks_over_200_with_paths() {
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: http://unused.invalid/api
    endpoints: [search]
"#,
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["validateSchema", "addRoute"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            schema_validator: Some(plugin("mockschemavalidator")),
            router: Some(router_plugin(&rules, "caller")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    // transaction_id intentionally missing.
    let request_body = json!({
        "context": {
            "version": "1.1.0",
            "domain": "retail:1.1.0",
            "action": "search"
        },
        "message": {}
    });
    let resp = app
        .oneshot(post("/bap/caller/search", &request_body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "NACK");
    assert_eq!(json["error"]["errors"][0]["paths"], "context.transaction_id");
}

#[tokio::test]
async fn v2_routing_is_domain_agnostic() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "2.0.0"
    targetType: url
    target:
      url: {backend_url}/v2
    endpoints: [search]
"#
        ),
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["validateSchema", "addRoute"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            schema_validator: Some(plugin("mockschemavalidator")),
            router: Some(router_plugin(&rules, "caller")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    for domain in ["retail:1.1.0", "mobility:1.1.0"] {
        let resp = app
            .clone()
            .oneshot(post(
                "/bap/caller/search",
                &beckn_body("2.0.0", domain, "search"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let received = recv_within(&mut backend_rx, "proxied request").await;
        assert_eq!(received.path, "/v2/search");
    }
}

#[tokio::test]
async fn v2_conflict_is_rejected_at_module_build() {
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        r#"
routingRules:
  - version: "2.0.0"
    domain: "X"
    targetType: url
    target:
      url: http://x.invalid
    endpoints: [search]
  - version: "2.0.0"
    domain: "Y"
    targetType: url
    target:
      url: http://y.invalid
    endpoints: [search]
"#,
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["addRoute"],
        PluginBindings {
            router: Some(router_plugin(&rules, "caller")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let err = build_router(&manager, &config, metrics).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("duplicate endpoint 'search'"), "{msg}");
    assert!(msg.contains("2.0.0"), "{msg}");
}

// ---------------------------------------------------------------------------
// Universals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipeline_runs_steps_in_order_and_short_circuits() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let counters = Arc::new(Counters::default());
    let mut manager = manager_with_mocks(counters);
    for (label, fail) in [("stepA", false), ("stepB", true), ("stepC", false)] {
        let log = log.clone();
        manager
            .register_step(
                label,
                Box::new(move |_cfg| {
                    let step: Arc<dyn Step> = Arc::new(RecordingStep {
                        label,
                        log: log.clone(),
                        fail,
                    });
                    Ok((step, None))
                }),
            )
            .unwrap();
    }

    let config = app_config(vec![module(
        "ordered",
        "/ordered",
        &["stepA", "stepB", "stepC"],
        PluginBindings {
            steps: vec![plugin("stepA"), plugin("stepB"), plugin("stepC")],
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let resp = app
        .oneshot(post("/ordered/search", &beckn_body("1.1.0", "retail:1.1.0", "search")))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(*log.lock().unwrap(), vec!["stepA", "stepB"]);
}

#[tokio::test]
async fn header_validation_cookie_skips_sign_checks_entirely() {
    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters.clone());

    let config = app_config(vec![module(
        "bapTxnReceiver",
        "/bap/receiver",
        &["validateSign"],
        PluginBindings {
            cache: Some(plugin("inmemorycache")),
            key_manager: Some(plugin("mockkeys")),
            sign_validator: Some(plugin("mocksignvalidator")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let auth = AuthHeader::build("bpp.example.com", "key-9", 1700000000, 1700000300, "forged");
    let req = Request::builder()
        .method("POST")
        .uri("/bap/receiver/on_search")
        .header(header::COOKIE, "header_validation=false")
        .header(header::AUTHORIZATION, auth)
        .body(Body::from(
            serde_json::to_vec(&beckn_body("1.1.0", "retail:1.1.0", "on_search")).unwrap(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "ACK");
    assert_eq!(counters.sign_validations.load(Ordering::SeqCst), 0);
    assert_eq!(counters.key_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rewritten_body_reaches_upstream_byte_exact() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: {backend_url}/api
    endpoints: [search]
"#
        ),
    );

    let rewritten = serde_json::to_vec(&beckn_body("1.1.0", "retail:1.1.0", "search")).unwrap();

    let counters = Arc::new(Counters::default());
    let mut manager = manager_with_mocks(counters);
    let step_body = rewritten.clone();
    manager
        .register_step(
            "rewriteBody",
            Box::new(move |_cfg| {
                let step: Arc<dyn Step> = Arc::new(RewriteBodyStep {
                    new_body: step_body.clone(),
                });
                Ok((step, None))
            }),
        )
        .unwrap();

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["rewriteBody", "addRoute"],
        PluginBindings {
            router: Some(router_plugin(&rules, "caller")),
            steps: vec![plugin("rewriteBody")],
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    // Original body differs from what the step writes.
    let resp = app
        .oneshot(post("/bap/caller/search", &json!({"original": true})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let received = recv_within(&mut backend_rx, "proxied request").await;
    assert_eq!(received.body, rewritten);
}

#[tokio::test]
async fn custom_response_body_cookie_replaces_ack() {
    let (backend_url, mut backend_rx) = spawn_backend().await;
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        &format!(
            r#"
routingRules:
  - version: "1.1.0"
    domain: "retail:1.1.0"
    targetType: url
    target:
      url: {backend_url}/api
    endpoints: [on_search]
"#
        ),
    );

    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters);

    let config = app_config(vec![module(
        "bapTxnReceiver",
        "/bap/receiver",
        &["addRoute"],
        PluginBindings {
            router: Some(router_plugin(&rules, "receiver")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/bap/receiver/on_search")
        .header(header::COOKIE, r#"custom-response-body={"handled":true}"#)
        .body(Body::from(
            serde_json::to_vec(&beckn_body("1.1.0", "retail:1.1.0", "on_search")).unwrap(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["handled"], true);

    // Delivery still happens behind the custom response.
    let received = recv_within(&mut backend_rx, "async delivery").await;
    assert_eq!(received.path, "/api/on_search");
}

#[tokio::test]
async fn msgq_route_publishes_and_acks() {
    let dir = TempDir::new().unwrap();
    let rules = write_rules(
        &dir,
        r#"
routingRules:
  - version: "2.0.0"
    targetType: msgq
    target:
      topicId: beckn-search
    endpoints: [search]
"#,
    );

    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());
    let mut manager = manager_with_mocks(counters);
    manager
        .register_publisher(
            "mockpublisher",
            Box::new(move |_cfg| {
                let publisher: Arc<dyn Publisher> = Arc::new(CapturePublisher {
                    tx: publish_tx.clone(),
                });
                Ok((publisher, None))
            }),
        )
        .unwrap();

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["addRoute"],
        PluginBindings {
            router: Some(router_plugin(&rules, "caller")),
            publisher: Some(plugin("mockpublisher")),
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let request_body = beckn_body("2.0.0", "retail:1.1.0", "search");
    let resp = app
        .oneshot(post("/bap/caller/search", &request_body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"]["ack"]["status"], "ACK");

    let (topic, payload) = publish_rx.recv().await.unwrap();
    assert_eq!(topic, "beckn-search");
    assert_eq!(payload, serde_json::to_vec(&request_body).unwrap());
}

#[tokio::test]
async fn middleware_resolves_subscriber_before_the_pipeline() {
    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let counters = Arc::new(Counters::default());
    let mut manager = manager_with_mocks(counters);
    manager
        .register_middleware(
            "tenantresolver",
            Box::new(|_cfg| {
                let mw: Arc<dyn Middleware> = Arc::new(SubscriberMiddleware {
                    subscriber_id: "resolved.example.com",
                });
                Ok((mw, None))
            }),
        )
        .unwrap();
    let step_seen = seen.clone();
    manager
        .register_step(
            "recordSubId",
            Box::new(move |_cfg| {
                let step: Arc<dyn Step> = Arc::new(RecordSubIdStep {
                    seen: step_seen.clone(),
                });
                Ok((step, None))
            }),
        )
        .unwrap();

    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["recordSubId"],
        PluginBindings {
            middleware: vec![plugin("tenantresolver")],
            steps: vec![plugin("recordSubId")],
            ..PluginBindings::default()
        },
    )]);

    let metrics = Arc::new(Metrics::new());
    let (app, _modules) = build_router(&manager, &config, metrics).unwrap();

    let resp = app
        .oneshot(post("/bap/caller/search", &beckn_body("1.1.0", "retail:1.1.0", "search")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The extension beats the module's configured subscriber id.
    assert_eq!(seen.lock().unwrap().as_deref(), Some("resolved.example.com"));
}

#[tokio::test]
async fn missing_capability_fails_at_build_naming_the_step() {
    let counters = Arc::new(Counters::default());
    let manager = manager_with_mocks(counters);

    // sign requires Signer and KeyManager; neither is bound.
    let config = app_config(vec![module(
        "bapTxnCaller",
        "/bap/caller",
        &["sign"],
        PluginBindings::default(),
    )]);

    let metrics = Arc::new(Metrics::new());
    let err = build_router(&manager, &config, metrics).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("sign"), "{msg}");
    assert!(msg.contains("not configured"), "{msg}");
}
