use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::error;

type Hook = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Per-request collection of deferred closures, carried through request
/// extensions. Work registered here runs after the client response, in
/// registration order, on a task that client disconnect cannot cancel.
#[derive(Clone, Default)]
pub struct PostResponseHooks {
    inner: Arc<Mutex<Vec<Hook>>>,
}

impl PostResponseHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lock().push(Box::pin(hook));
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn drain(&self) -> Vec<Hook> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Hook>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Outer middleware around every module. Installs the hook registry before
/// the handler runs and fires collected hooks once the handler and all inner
/// middleware have unwound.
pub async fn post_response_layer(mut req: Request, next: Next) -> Response {
    let hooks = PostResponseHooks::new();
    req.extensions_mut().insert(hooks.clone());

    let response = next.run(req).await;

    let pending = hooks.drain();
    if !pending.is_empty() {
        tokio::spawn(run_hooks(pending));
    }
    response
}

/// Runs hooks in registration order. Each hook executes on its own spawned
/// task awaited serially, so a panicking hook is isolated and later hooks
/// still run.
async fn run_hooks(pending: Vec<Hook>) {
    for (idx, hook) in pending.into_iter().enumerate() {
        if let Err(join_err) = tokio::spawn(hook).await {
            if join_err.is_panic() {
                error!(hook = idx, "post-response hook panicked");
            } else {
                error!(hook = idx, "post-response hook cancelled");
            }
        }
    }
}
