use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use tracing::debug;

use crate::model::{
    AuthHeader, PayloadContext, ProtocolError, Role, StepContext, AUTH_HEADER_GATEWAY,
    AUTH_HEADER_SUBSCRIBER, SIGNATURE_VALIDITY_SECS, UNAUTHORIZED_HEADER_GATEWAY,
};
use crate::observability::Metrics;
use crate::plugin::{
    KeyManager, OndcValidator, OndcWorkbench, RouteResolver, SchemaValidator, SignValidator,
    Signer, Step,
};

use super::instrument::InstrumentedStep;
use super::{BuildError, PluginSet};

const BUILTIN_STEP_NAMES: &[&str] = &[
    "sign",
    "validateSign",
    "validateSchema",
    "addRoute",
    "validateOndcPayload",
    "validateOndcCallSave",
    "ondcWorkbenchReceiver",
    "ondcWorkbenchValidateContext",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTIN_STEP_NAMES.contains(&name)
}

/// Builds the ordered step list for one module. Each built-in requires
/// specific capabilities; a missing one fails here, naming the step, before
/// the module ever serves a request.
pub(crate) fn build_steps(
    names: &[String],
    plugins: &PluginSet,
    custom: &HashMap<String, Arc<dyn Step>>,
    module_name: &str,
    metrics: Arc<Metrics>,
) -> Result<Vec<Arc<dyn Step>>, BuildError> {
    let mut steps: Vec<Arc<dyn Step>> = Vec::with_capacity(names.len());

    for name in names {
        let step: Arc<dyn Step> = match name.as_str() {
            "sign" => Arc::new(SignStep {
                signer: require(&plugins.signer, name, "Signer")?,
                key_manager: require(&plugins.key_manager, name, "KeyManager")?,
            }),
            "validateSign" => Arc::new(ValidateSignStep {
                validator: require(&plugins.sign_validator, name, "SignValidator")?,
                key_manager: require(&plugins.key_manager, name, "KeyManager")?,
                metrics: metrics.clone(),
            }),
            "validateSchema" => Arc::new(ValidateSchemaStep {
                validator: require(&plugins.schema_validator, name, "SchemaValidator")?,
                metrics: metrics.clone(),
            }),
            "addRoute" => Arc::new(AddRouteStep {
                router: require(&plugins.router, name, "Router")?,
                metrics: metrics.clone(),
            }),
            "validateOndcPayload" => Arc::new(ValidateOndcPayloadStep {
                validator: require(&plugins.ondc_validator, name, "OndcValidator")?,
            }),
            "validateOndcCallSave" => Arc::new(ValidateOndcCallSaveStep {
                validator: require(&plugins.ondc_validator, name, "OndcValidator")?,
            }),
            "ondcWorkbenchReceiver" => Arc::new(WorkbenchReceiveStep {
                workbench: require(&plugins.ondc_workbench, name, "OndcWorkbench")?,
            }),
            "ondcWorkbenchValidateContext" => Arc::new(WorkbenchValidateContextStep {
                workbench: require(&plugins.ondc_workbench, name, "OndcWorkbench")?,
            }),
            other => custom
                .get(other)
                .cloned()
                .ok_or_else(|| BuildError::UnknownStep(other.to_string()))?,
        };

        steps.push(InstrumentedStep::wrap(
            step,
            name.clone(),
            module_name.to_string(),
            metrics.clone(),
        ));
    }

    Ok(steps)
}

fn require<T: ?Sized>(
    capability: &Option<Arc<T>>,
    step: &str,
    name: &'static str,
) -> Result<Arc<T>, BuildError> {
    capability.clone().ok_or_else(|| BuildError::MissingCapability {
        step: step.to_string(),
        capability: name,
    })
}

struct SignStep {
    signer: Arc<dyn Signer>,
    key_manager: Arc<dyn KeyManager>,
}

#[async_trait]
impl Step for SignStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        if ctx.sub_id.is_empty() {
            return Err(ProtocolError::bad_request("subscriberID not set"));
        }
        let keyset = self
            .key_manager
            .keyset(&ctx.sub_id)
            .await
            .map_err(|e| ProtocolError::internal(format!("failed to get signing key: {e}")))?;

        let created = chrono::Utc::now().timestamp();
        let expires = created + SIGNATURE_VALIDITY_SECS;
        let signature = self
            .signer
            .sign(&ctx.body, &keyset.signing_private, created, expires)
            .await
            .map_err(|e| ProtocolError::internal(format!("failed to sign request: {e}")))?;

        let header = AuthHeader::build(
            &ctx.sub_id,
            &keyset.unique_key_id,
            created,
            expires,
            &signature,
        );
        debug!(subscriber = %ctx.sub_id, "Signature generated");

        let name = if ctx.role == Role::Gateway {
            AUTH_HEADER_GATEWAY
        } else {
            AUTH_HEADER_SUBSCRIBER
        };
        let value = HeaderValue::from_str(&header)
            .map_err(|e| ProtocolError::internal(format!("invalid auth header value: {e}")))?;
        ctx.request.headers.insert(HeaderName::from_static(name), value);
        Ok(())
    }
}

struct ValidateSignStep {
    validator: Arc<dyn SignValidator>,
    key_manager: Arc<dyn KeyManager>,
    metrics: Arc<Metrics>,
}

#[async_trait]
impl Step for ValidateSignStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        let result = self.validate_headers(ctx).await;
        let status = if result.is_ok() { "success" } else { "failed" };
        self.metrics.sign_validation(status);
        result
    }
}

impl ValidateSignStep {
    async fn validate_headers(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        if ctx.request.cookie("header_validation").as_deref() == Some("false") {
            debug!("Skipping signature validation step as per header_validation cookie");
            return Ok(());
        }

        let Some(header_value) = ctx
            .request
            .headers
            .get(AUTH_HEADER_SUBSCRIBER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
        else {
            return Ok(());
        };

        debug!(header = AUTH_HEADER_SUBSCRIBER, "Validating auth header");
        if let Err(cause) = self.verify(ctx, &header_value).await {
            if let Ok(challenge) = HeaderValue::from_str(&AuthHeader::challenge(&ctx.sub_id)) {
                ctx.resp_headers
                    .insert(HeaderName::from_static(UNAUTHORIZED_HEADER_GATEWAY), challenge);
            }
            return Err(ProtocolError::sign_validation(format!(
                "failed to validate {AUTH_HEADER_SUBSCRIBER}: {cause}"
            )));
        }
        Ok(())
    }

    async fn verify(&self, ctx: &StepContext, value: &str) -> Result<(), String> {
        let parsed = AuthHeader::parse(value).map_err(|_| "failed to parse header".to_string())?;
        debug!(subscriber = %parsed.subscriber_id, "Validating signature");
        let public_key = self
            .key_manager
            .signing_public_key(&parsed.subscriber_id, &parsed.unique_key_id)
            .await
            .map_err(|e| format!("failed to get validation key: {e}"))?;
        self.validator
            .validate(&ctx.body, value, &public_key)
            .await
            .map_err(|e| format!("sign validation failed: {e}"))
    }
}

struct ValidateSchemaStep {
    validator: Arc<dyn SchemaValidator>,
    metrics: Arc<Metrics>,
}

#[async_trait]
impl Step for ValidateSchemaStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        let version = PayloadContext::extract(&ctx.body)
            .effective_version()
            .unwrap_or("unknown")
            .to_string();
        let result = self.validator.validate(&ctx.request.uri, &ctx.body).await;
        let status = if result.is_ok() { "success" } else { "failed" };
        self.metrics.schema_validation(&version, status);
        result
    }
}

struct AddRouteStep {
    router: Arc<dyn RouteResolver>,
    metrics: Arc<Metrics>,
}

#[async_trait]
impl Step for AddRouteStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        let route = self.router.route(&ctx.request.uri, &ctx.body).await?;
        self.metrics.routing_decision(route.target_type.as_str());
        ctx.route = Some(route);
        Ok(())
    }
}

struct ValidateOndcPayloadStep {
    validator: Arc<dyn OndcValidator>,
}

#[async_trait]
impl Step for ValidateOndcPayloadStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        if ctx.request.cookie("protocol_validation").as_deref() == Some("false") {
            debug!("Skipping ONDC validation step as per protocol_validation cookie");
            return Ok(());
        }
        self.validator
            .validate_payload(&ctx.request.uri, &ctx.body)
            .await
    }
}

struct ValidateOndcCallSaveStep {
    validator: Arc<dyn OndcValidator>,
}

#[async_trait]
impl Step for ValidateOndcCallSaveStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        // Fires regardless of the protocol_validation cookie.
        self.validator
            .save_validation_data(&ctx.request.uri, &ctx.body)
            .await
    }
}

struct WorkbenchReceiveStep {
    workbench: Arc<dyn OndcWorkbench>,
}

#[async_trait]
impl Step for WorkbenchReceiveStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        self.workbench
            .workbench_receiver(&ctx.request, &ctx.body)
            .await?;
        if let Some(sub_id) = ctx.request.cookie("subscriber_id") {
            debug!(subscriber = %sub_id, "Overriding subscriber id from cookie");
            ctx.sub_id = sub_id;
        }
        Ok(())
    }
}

struct WorkbenchValidateContextStep {
    workbench: Arc<dyn OndcWorkbench>,
}

#[async_trait]
impl Step for WorkbenchValidateContextStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        self.workbench
            .workbench_validate_context(&ctx.request, &ctx.body)
            .await
    }
}
