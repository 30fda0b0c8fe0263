use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::PluginConfig;

use super::definition::{Cache, PluginError};
use super::manager::Loaded;

/// Process-local TTL cache. Default capability for deployments that do not
/// bind an external cache; key lookups for signature verification land here.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    default_ttl: Option<Duration>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl InMemoryCache {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Factory for the plugin manager. Config keys: `defaultTtlSecs`
    /// (optional; absent means entries never expire unless a TTL is given
    /// per call).
    pub fn load(cfg: &PluginConfig) -> Result<Loaded<dyn Cache>, PluginError> {
        let default_ttl = match cfg.config.get("defaultTtlSecs") {
            None => None,
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    PluginError::InvalidConfig(format!("defaultTtlSecs must be an integer, got '{raw}'"))
                })?;
                Some(Duration::from_secs(secs))
            }
        };
        Ok((Arc::new(Self::new(default_ttl)), None))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, PluginError> {
        let mut entries = self.lock();
        match entries.get(key) {
            None => Ok(None),
            Some(entry) => {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        entries.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PluginError> {
        let expires_at = ttl.or(self.default_ttl).map(|d| Instant::now() + d);
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PluginError> {
        self.lock().remove(key);
        Ok(())
    }
}
