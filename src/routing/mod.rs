//! Versioned routing-rule engine.
//!
//! Rules are loaded from a YAML file at module build time and compiled into
//! an immutable index. Beckn v1 rules are domain-aware (`version, domain,
//! action`); v2 rules are domain-agnostic (`version, action`). Conflicts are
//! rejected at load, never at request time.

mod engine;
mod rules;

pub use engine::{RoutingDirection, RoutingEngine};
pub use rules::{RoutingConfigError, RoutingConfigFile, RoutingRule, RuleTarget, RuleTargetType};
