use std::sync::Arc;

use crate::config::HttpClientConfig;
use crate::plugin::{PluginError, TransportWrapper};

/// Builds the module's shared outbound HTTP client.
///
/// Only knobs explicitly set in the config override the client defaults; a
/// zero value keeps the default. The transport wrapper, when bound, gets the
/// final say over the builder for cross-cutting concerns.
pub fn build_client(
    cfg: &HttpClientConfig,
    wrapper: Option<&Arc<dyn TransportWrapper>>,
) -> Result<reqwest::Client, PluginError> {
    let mut builder = reqwest::Client::builder();

    if cfg.max_idle_conns_per_host > 0 {
        builder = builder.pool_max_idle_per_host(cfg.max_idle_conns_per_host);
    }
    if let Some(timeout) = cfg.idle_conn_timeout() {
        builder = builder.pool_idle_timeout(timeout);
    }
    if let Some(timeout) = cfg.response_header_timeout() {
        builder = builder.timeout(timeout);
    }

    if let Some(wrapper) = wrapper {
        tracing::debug!("Applying custom transport wrapper");
        builder = wrapper.wrap(builder);
    }

    builder
        .build()
        .map_err(|e| PluginError::operation(format!("failed to build http client: {e}")))
}
