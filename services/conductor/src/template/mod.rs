//! Template Definitions.
//!
//! Each resource kind owns an orchestration template plus two mapping tables:
//! logical attributes to template parameters, and stack outputs back to
//! attributes. The definitions are pure; nothing here talks to a remote system.

mod function;
mod nodepool;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use oasis_id::ResourceKind;

use crate::model::{Attributes, ManagedResource, NodePoolPolicy};
use crate::orchestrator::{Parameters, StackOutput};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("required parameter '{0}' not provided")]
    RequiredParameterNotProvided(String),

    #[error("invalid value for parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },
}

/// Maps one logical attribute onto one template parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParameterMapping {
    pub heat_param: &'static str,
    pub attr: &'static str,
    pub required: bool,
}

impl ParameterMapping {
    const fn required(heat_param: &'static str, attr: &'static str) -> Self {
        Self {
            heat_param,
            attr,
            required: true,
        }
    }

    const fn optional(heat_param: &'static str, attr: &'static str) -> Self {
        Self {
            heat_param,
            attr,
            required: false,
        }
    }
}

/// Maps one stack output onto one logical attribute.
#[derive(Debug, Clone, Copy)]
pub struct OutputMapping {
    pub heat_output: &'static str,
    pub attr: &'static str,
}

/// Deployment-wide values injected into every parameter set.
#[derive(Debug, Clone)]
pub struct ExtraParameters {
    pub trustee_domain_id: String,
    /// Identity endpoint the provisioned stack authenticates against.
    pub auth_url: String,
}

/// Template definition selected by resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateDefinition {
    Function,
    NodePool,
}

impl TemplateDefinition {
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Function => Self::Function,
            ResourceKind::NodePool => Self::NodePool,
        }
    }

    /// The orchestration template body.
    pub fn template(&self) -> &'static str {
        match self {
            Self::Function => function::TEMPLATE,
            Self::NodePool => nodepool::TEMPLATE,
        }
    }

    pub fn parameter_mappings(&self) -> &'static [ParameterMapping] {
        match self {
            Self::Function => function::PARAMETERS,
            Self::NodePool => nodepool::PARAMETERS,
        }
    }

    pub fn output_mappings(&self) -> &'static [OutputMapping] {
        match self {
            Self::Function => function::OUTPUTS,
            Self::NodePool => nodepool::OUTPUTS,
        }
    }

    /// Attribute that tracks the live size of the deployment.
    pub fn live_count_attr(&self) -> &'static str {
        match self {
            Self::Function => "replicas",
            Self::NodePool => "node_count",
        }
    }

    /// Template parameter a logical attribute is passed as.
    pub fn heat_param_name(&self, attr: &str) -> Option<&'static str> {
        self.parameter_mappings()
            .iter()
            .find(|mapping| mapping.attr == attr)
            .map(|mapping| mapping.heat_param)
    }

    /// Build the full parameter set for a resource.
    ///
    /// Node pools fold in the scaling hints of their policy and have their
    /// size clamped into its bounds.
    pub fn compute_parameters(
        &self,
        resource: &ManagedResource,
        policy: Option<&NodePoolPolicy>,
        extra: &ExtraParameters,
    ) -> Result<Parameters, TemplateError> {
        let mut parameters = Parameters::new();

        for mapping in self.parameter_mappings() {
            match resource.attributes.get(mapping.attr) {
                Some(value) => {
                    parameters.insert(mapping.heat_param.to_string(), value);
                }
                None if mapping.required => {
                    return Err(TemplateError::RequiredParameterNotProvided(
                        mapping.heat_param.to_string(),
                    ));
                }
                None => {}
            }
        }

        if let (Attributes::NodePool(pool), Some(policy)) = (&resource.attributes, policy) {
            let count_param = self.heat_param_name("node_count").unwrap_or("node_count");
            parameters.insert(
                count_param.to_string(),
                Value::from(policy.clamp_size(pool.node_count)),
            );
            for (name, value) in policy.scaling_hints() {
                parameters.insert(name.to_string(), Value::from(value));
            }
        }

        let trust = resource
            .trust
            .as_ref()
            .ok_or_else(|| TemplateError::RequiredParameterNotProvided("trust_id".to_string()))?;
        for (name, value) in [
            ("trustee_domain_id", extra.trustee_domain_id.as_str()),
            ("trustee_user_id", trust.trustee_user_id.as_str()),
            ("trustee_username", trust.trustee_username.as_str()),
            ("trustee_password", trust.trustee_password.as_str()),
            ("trust_id", trust.trust_id.as_str()),
            ("auth_url", extra.auth_url.as_str()),
        ] {
            parameters.insert(name.to_string(), Value::from(value));
        }

        Ok(parameters)
    }

    /// Attribute updates sourced from stack outputs. Missing outputs are
    /// skipped with a warning.
    pub fn map_outputs(&self, outputs: &[StackOutput]) -> Vec<(&'static str, Value)> {
        self.output_mappings()
            .iter()
            .filter_map(|mapping| {
                let found = outputs
                    .iter()
                    .find(|output| output.output_key == mapping.heat_output)
                    .map(|output| output.output_value.clone())
                    .filter(|value| !value.is_null());
                if found.is_none() {
                    warn!(output = mapping.heat_output, "Stack did not report output");
                }
                found.map(|value| (mapping.attr, value))
            })
            .collect()
    }

    /// Live size as reported by the stack's current parameters.
    ///
    /// The orchestrator echoes parameters as strings, so numeric strings are
    /// accepted too.
    pub fn live_count(&self, parameters: &Parameters) -> Option<u32> {
        let param = self.heat_param_name(self.live_count_attr())?;
        match parameters.get(param)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oasis_id::{NodePoolId, NodePoolPolicyId, ResourceId};
    use oasis_reconcile::Generation;
    use serde_json::json;

    use crate::model::{
        FunctionAttributes, NodePoolAttributes, Owner, ResourceStatus, TrustCredentials,
    };

    fn extra() -> ExtraParameters {
        ExtraParameters {
            trustee_domain_id: "trustees".to_string(),
            auth_url: "http://keystone:5000/v3".to_string(),
        }
    }

    fn trust() -> TrustCredentials {
        TrustCredentials {
            trustee_username: "np_1".to_string(),
            trustee_user_id: "user-1".to_string(),
            trustee_password: "secret".to_string(),
            trust_id: "trust-1".to_string(),
        }
    }

    fn resource(id: ResourceId, attributes: Attributes) -> ManagedResource {
        let now = Utc::now();
        ManagedResource {
            id,
            name: "pool".to_string(),
            owner: Owner {
                project_id: "p".to_string(),
                user_id: "u".to_string(),
            },
            stack_id: None,
            status: ResourceStatus::CREATE_IN_PROGRESS,
            status_reason: None,
            attributes,
            trust: Some(trust()),
            generation: Generation::INITIAL,
            created_at: now,
            updated_at: now,
        }
    }

    fn pool(node_count: u32) -> ManagedResource {
        resource(
            NodePoolId::new().into(),
            Attributes::NodePool(NodePoolAttributes {
                policy_id: None,
                host: None,
                flavor: "m1.small".to_string(),
                image: "fedora".to_string(),
                key_name: None,
                node_count,
                node_addresses: Vec::new(),
            }),
        )
    }

    fn policy() -> NodePoolPolicy {
        NodePoolPolicy {
            id: NodePoolPolicyId::new(),
            name: "bounded".to_string(),
            min_size: Some(2),
            max_size: Some(5),
            scaleup_adjust: Some(1),
            scaleup_cooldown: None,
            scaleup_period: None,
            scaleup_evaluation_periods: None,
            scaleup_threshold: None,
            scaledown_adjust: None,
            scaledown_cooldown: None,
            scaledown_period: None,
            scaledown_evaluation_periods: None,
            scaledown_threshold: None,
        }
    }

    #[test]
    fn node_pool_parameters_include_trust_and_skip_unset() {
        let params = TemplateDefinition::NodePool
            .compute_parameters(&pool(3), None, &extra())
            .unwrap();

        assert_eq!(params["flavor"], json!("m1.small"));
        assert_eq!(params["node_count"], json!(3));
        assert_eq!(params["trust_id"], json!("trust-1"));
        assert_eq!(params["trustee_domain_id"], json!("trustees"));
        assert_eq!(params["auth_url"], json!("http://keystone:5000/v3"));
        assert!(!params.contains_key("key_name"));
    }

    #[test]
    fn policy_clamps_size_and_adds_hints() {
        let params = TemplateDefinition::NodePool
            .compute_parameters(&pool(9), Some(&policy()), &extra())
            .unwrap();

        assert_eq!(params["node_count"], json!(5));
        assert_eq!(params["min_size"], json!(2));
        assert_eq!(params["scaleup_adjust"], json!(1));
        assert!(!params.contains_key("scaledown_adjust"));
    }

    #[test]
    fn missing_trust_is_a_required_parameter() {
        let mut resource = pool(1);
        resource.trust = None;

        let err = TemplateDefinition::NodePool
            .compute_parameters(&resource, None, &extra())
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::RequiredParameterNotProvided("trust_id".to_string())
        );
    }

    #[test]
    fn function_parameters_map_logical_names() {
        let function = resource(
            oasis_id::FunctionId::new().into(),
            Attributes::Function(FunctionAttributes {
                body: "print(1)".to_string(),
                description: Some("demo".to_string()),
                endpoint_id: None,
                nodepool_id: None,
                replicas: 2,
                api_address: None,
            }),
        );
        let def = TemplateDefinition::Function;
        let params = def.compute_parameters(&function, None, &extra()).unwrap();

        assert_eq!(def.heat_param_name("body"), Some("function_body"));
        assert_eq!(params["function_body"], json!("print(1)"));
        assert_eq!(params["function_replicas"], json!(2));
        assert_eq!(params["function_description"], json!("demo"));
    }

    #[test]
    fn outputs_map_and_skip_missing() {
        let outputs = vec![StackOutput {
            output_key: "api_address".to_string(),
            output_value: json!("http://10.0.0.9:8080"),
        }];

        let mapped = TemplateDefinition::Function.map_outputs(&outputs);
        assert_eq!(mapped, vec![("api_address", json!("http://10.0.0.9:8080"))]);
        assert!(TemplateDefinition::NodePool.map_outputs(&outputs).is_empty());
    }

    #[test]
    fn live_count_accepts_string_parameters() {
        let mut params = Parameters::new();
        params.insert("node_count".to_string(), json!("4"));
        assert_eq!(TemplateDefinition::NodePool.live_count(&params), Some(4));

        params.insert("function_replicas".to_string(), json!(3));
        assert_eq!(TemplateDefinition::Function.live_count(&params), Some(3));

        assert_eq!(TemplateDefinition::Function.live_count(&Parameters::new()), None);
    }
}
