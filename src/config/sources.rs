use std::env;
use std::path::PathBuf;

use config::{Environment, File, FileFormat};

use super::models::AppConfig;
use super::ConfigError;

const CONFIG_ENV_VAR: &str = "ONIX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/onix.yaml";
const ENV_PREFIX: &str = "ONIX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from the default path (or `ONIX_CONFIG`) plus
/// environment overrides.
pub fn load() -> Result<AppConfig, ConfigError> {
    // Load .env if present; ignore a missing file.
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and the environment.
pub fn load_from_sources(config_path: PathBuf) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        let raw = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.display().to_string(),
            source,
        })?;
        let expanded = expand_env(&raw);
        builder = builder.add_source(File::from_str(&expanded, FileFormat::Yaml));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // ONIX__HTTP__ADDRESS -> http.address
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

/// Substitutes `${VAR}` references from the process environment.
///
/// Unset variables are left as-is so a later validation or plugin build can
/// name the missing reference instead of silently injecting an empty string.
pub fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_from_sources(temp_dir.path().join("nonexistent.yaml")).unwrap();
        assert_eq!(config.http.address.to_string(), "0.0.0.0:8080");
        assert!(config.modules.is_empty());
    }

    #[test]
    fn load_full_module_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("onix.yaml");

        let yaml = r#"
appName: onix
http:
  address: 127.0.0.1:9090
modules:
  - name: bapTxnCaller
    path: /bap/caller
    handler:
      role: bap
      subscriberId: bap.example.com
      httpClientConfig:
        responseHeaderTimeoutSecs: 10
      plugins:
        cache:
          id: inmemorycache
        router:
          id: router
          config:
            routingConfig: config/routing.yaml
            mode: caller
      steps: [validateSchema, addRoute, sign]
"#;
        fs::write(&config_path, yaml).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.http.address.to_string(), "127.0.0.1:9090");
        assert_eq!(config.modules.len(), 1);

        let module = &config.modules[0];
        assert_eq!(module.name, "bapTxnCaller");
        assert_eq!(module.path, "/bap/caller");
        assert_eq!(
            module.handler.subscriber_id.as_deref(),
            Some("bap.example.com")
        );
        assert_eq!(
            module.handler.steps,
            vec!["validateSchema", "addRoute", "sign"]
        );
        let router = module.handler.plugins.router.as_ref().unwrap();
        assert_eq!(router.config["mode"], "caller");
    }

    #[test]
    fn expand_env_substitutes_known_vars() {
        // PATH is always present; avoids mutating the process environment.
        let path = env::var("PATH").unwrap();
        let out = expand_env("bin: ${PATH}");
        assert_eq!(out, format!("bin: {path}"));
    }

    #[test]
    fn expand_env_keeps_unset_vars_literal() {
        let out = expand_env("key: ${ONIX_TEST_DEFINITELY_UNSET}");
        assert_eq!(out, "key: ${ONIX_TEST_DEFINITELY_UNSET}");
    }

    #[test]
    fn expand_env_handles_unterminated_reference() {
        let out = expand_env("key: ${BROKEN");
        assert_eq!(out, "key: ${BROKEN");
    }
}
