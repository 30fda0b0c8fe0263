use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use tracing::{debug, error, info, warn};

use crate::model::{ProtocolError, Route, StepContext, TargetType};
use crate::plugin::Publisher;
use crate::response;

use super::hooks::PostResponseHooks;

/// Delivers the finalized request once the pipeline has succeeded.
///
/// `act_as_proxy` routes run synchronously (reverse-proxy or publish) and
/// relay the outcome; everything else acks the client immediately and defers
/// delivery to a post-response hook on a detached task.
pub(crate) async fn dispatch(
    ctx: StepContext,
    client: reqwest::Client,
    publisher: Option<Arc<dyn Publisher>>,
    hooks: Option<PostResponseHooks>,
    delivery_timeout: Option<Duration>,
) -> Response {
    let Some(route) = ctx.route.clone() else {
        return response::ack();
    };
    debug!(target_type = route.target_type.as_str(), "Routing request");

    if route.act_as_proxy {
        match route.target_type {
            TargetType::Url => proxy(&ctx, &route, &client).await,
            TargetType::Msgq | TargetType::Publisher => {
                publish_now(&ctx, &route, publisher.as_deref()).await
            }
            _ => {
                let err = ProtocolError::internal(format!(
                    "unknown route type: {}",
                    route.target_type.as_str()
                ));
                error!(%err, "Invalid configuration");
                response::nack(&err, ctx.message_id.as_deref())
            }
        }
    } else {
        let reply = match ctx.request.cookie("custom-response-body") {
            Some(raw) => response::ack_with_body(&raw),
            None => response::ack(),
        };

        match hooks {
            Some(hooks) => {
                hooks.register(deliver(route, ctx.body, client, publisher, delivery_timeout));
            }
            None => {
                warn!("post-response middleware not installed; async delivery dropped");
            }
        }
        reply
    }
}

/// Synchronous reverse-proxy. Preserves the original method, query, and
/// headers; overwrites the upstream URL; sets `X-Forwarded-Host` to the
/// original host; rebuilds the body from the pipeline's buffer.
async fn proxy(ctx: &StepContext, route: &Route, client: &reqwest::Client) -> Response {
    let target = route.url.as_deref().unwrap_or_default();
    let mut url = match reqwest::Url::parse(target) {
        Ok(url) => url,
        Err(e) => {
            let err = ProtocolError::internal(format!("invalid upstream url '{target}': {e}"));
            error!(%err, "Proxy failed");
            return response::nack(&err, ctx.message_id.as_deref());
        }
    };
    if url.query().is_none() {
        url.set_query(ctx.request.uri.query());
    }

    info!(url = %url, "Forwarding request to URL");

    let mut headers = outbound_headers(&ctx.request.headers);
    if let Ok(host) = HeaderValue::from_str(&ctx.request.host) {
        headers.insert("x-forwarded-host", host);
    }

    let upstream = client
        .request(ctx.request.method.clone(), url)
        .headers(headers)
        .body(ctx.body.clone())
        .send()
        .await;

    match upstream {
        Ok(upstream) => {
            let status = upstream.status();
            let headers = response_headers(upstream.headers());
            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut resp = Response::new(Body::from(bytes));
                    *resp.status_mut() = status;
                    *resp.headers_mut() = headers;
                    resp
                }
                Err(e) => {
                    let err =
                        ProtocolError::internal(format!("failed to read upstream response: {e}"));
                    error!(%err, "Proxy failed");
                    response::nack(&err, ctx.message_id.as_deref())
                }
            }
        }
        Err(e) => {
            let err = ProtocolError::internal(format!("upstream request failed: {e}"));
            error!(%err, "Proxy failed");
            response::nack(&err, ctx.message_id.as_deref())
        }
    }
}

async fn publish_now(
    ctx: &StepContext,
    route: &Route,
    publisher: Option<&dyn Publisher>,
) -> Response {
    let Some(publisher) = publisher else {
        let err = ProtocolError::internal("publisher plugin not configured");
        error!(%err, "Invalid configuration");
        return response::nack(&err, ctx.message_id.as_deref());
    };
    let topic = route.publisher_id.as_deref().unwrap_or_default();
    info!(topic, "Publishing message");
    match publisher.publish(topic, &ctx.body).await {
        Ok(()) => response::ack(),
        Err(e) => {
            let err = ProtocolError::internal(format!("failed to publish message: {e}"));
            error!(%err, "Publish failed");
            response::nack(&err, ctx.message_id.as_deref())
        }
    }
}

/// Deferred delivery body for the ack-now path. Failures are logged, never
/// surfaced to the already-acknowledged client.
async fn deliver(
    route: Route,
    body: Vec<u8>,
    client: reqwest::Client,
    publisher: Option<Arc<dyn Publisher>>,
    timeout: Option<Duration>,
) {
    let work = deliver_inner(route, body, client, publisher);
    match timeout {
        Some(deadline) => {
            if tokio::time::timeout(deadline, work).await.is_err() {
                error!(timeout_secs = deadline.as_secs(), "Async delivery timed out");
            }
        }
        None => work.await,
    }
}

async fn deliver_inner(
    route: Route,
    body: Vec<u8>,
    client: reqwest::Client,
    publisher: Option<Arc<dyn Publisher>>,
) {
    match route.target_type {
        TargetType::Url => {
            let target = route.url.as_deref().unwrap_or_default();
            info!(url = target, "Making async request to URL");
            let forwarded_host = reqwest::Url::parse(target)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();

            let result = client
                .post(target)
                .header(CONTENT_TYPE, "application/json")
                .header("x-forwarded-host", forwarded_host)
                .body(body)
                .send()
                .await;
            match result {
                Ok(resp) => {
                    info!(status = resp.status().as_u16(), "Async request completed")
                }
                Err(e) => error!(error = %e, "Async request failed"),
            }
        }
        TargetType::Msgq | TargetType::Publisher => {
            let Some(publisher) = publisher else {
                error!("Publisher plugin not configured");
                return;
            };
            let topic = route.publisher_id.as_deref().unwrap_or_default();
            info!(topic, "Publishing message asynchronously");
            if let Err(e) = publisher.publish(topic, &body).await {
                error!(error = %e, "Failed to publish message asynchronously");
            }
        }
        _ => error!(
            target_type = route.target_type.as_str(),
            "Unknown route type for async delivery"
        ),
    }
}

/// Headers for the upstream call: everything except hop-by-hop fields and
/// the original Host (the client sets its own from the target URL).
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    out.remove(HOST);
    out.remove(CONTENT_LENGTH);
    out.remove(TRANSFER_ENCODING);
    out.remove(CONNECTION);
    out
}

fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    out.remove(CONTENT_LENGTH);
    out.remove(TRANSFER_ENCODING);
    out.remove(CONNECTION);
    out
}
