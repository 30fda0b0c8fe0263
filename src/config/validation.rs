use std::collections::HashSet;

use thiserror::Error;

use super::models::AppConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate module name '{0}'")]
    DuplicateModuleName(String),

    #[error("duplicate module path '{0}'")]
    DuplicateModulePath(String),

    #[error("module '{module}' path '{path}' must start with '/'")]
    InvalidModulePath { module: String, path: String },

    #[error("module '{0}' has an empty step sequence")]
    EmptySteps(String),
}

/// Structural checks that do not need the plugin manager. Unknown step
/// names and missing capabilities are caught later, when the module is
/// built against its plugins.
pub fn validate(config: &AppConfig) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    let mut paths = HashSet::new();

    for module in &config.modules {
        if !names.insert(module.name.as_str()) {
            return Err(ValidationError::DuplicateModuleName(module.name.clone()));
        }
        if !module.path.starts_with('/') {
            return Err(ValidationError::InvalidModulePath {
                module: module.name.clone(),
                path: module.path.clone(),
            });
        }
        let normalized = module.path.trim_end_matches('/');
        if !paths.insert(normalized.to_string()) {
            return Err(ValidationError::DuplicateModulePath(module.path.clone()));
        }
        if module.handler.steps.is_empty() {
            return Err(ValidationError::EmptySteps(module.name.clone()));
        }
    }

    Ok(())
}
