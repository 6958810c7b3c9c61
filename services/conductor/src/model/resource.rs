//! Managed resources: functions and node pools.
//!
//! Both kinds share one lifecycle and differ only in their declared
//! attributes, so the record is generic and the attributes are a tagged enum.

use std::fmt;

use chrono::{DateTime, Utc};
use oasis_id::{NodePoolId, NodePoolPolicyId, ResourceId, ResourceKind};
use oasis_reconcile::{Generation, SpecHash};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::status::ResourceStatus;

/// Orchestrator-assigned identifier of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(String);

impl StackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Project and user that own a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub project_id: String,
    pub user_id: String,
}

/// Delegated identity that lets background work act for the owner.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustCredentials {
    pub trustee_username: String,
    pub trustee_user_id: String,
    pub trustee_password: String,
    pub trust_id: String,
}

impl fmt::Debug for TrustCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustCredentials")
            .field("trustee_username", &self.trustee_username)
            .field("trustee_user_id", &self.trustee_user_id)
            .field("trustee_password", &"<redacted>")
            .field("trust_id", &self.trust_id)
            .finish()
    }
}

fn default_count() -> u32 {
    1
}

/// Declared configuration of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAttributes {
    /// Source body executed by the function.
    pub body: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Routing endpoint the function is bound to.
    #[serde(default)]
    pub endpoint_id: Option<String>,
    /// Node pool hosting the function.
    #[serde(default)]
    pub nodepool_id: Option<NodePoolId>,
    #[serde(default = "default_count")]
    pub replicas: u32,
    /// Invoke address reported by the orchestrator once provisioned.
    #[serde(default)]
    pub api_address: Option<String>,
}

/// Declared configuration of a node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolAttributes {
    #[serde(default)]
    pub policy_id: Option<NodePoolPolicyId>,
    /// Host the pool is pinned to, if any.
    #[serde(default)]
    pub host: Option<String>,
    pub flavor: String,
    pub image: String,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default = "default_count")]
    pub node_count: u32,
    /// Node addresses reported by the orchestrator once provisioned.
    #[serde(default)]
    pub node_addresses: Vec<String>,
}

/// Kind-specific attributes of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attributes {
    Function(FunctionAttributes),
    NodePool(NodePoolAttributes),
}

/// Attribute access by logical name failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    #[error("{kind} has no attribute '{attr}'")]
    Unknown { kind: ResourceKind, attr: String },

    #[error("invalid value for '{attr}': {message}")]
    InvalidValue { attr: String, message: String },

    #[error("changes for a {changes} cannot be applied to a {target}")]
    KindMismatch {
        target: ResourceKind,
        changes: ResourceKind,
    },
}

impl Attributes {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Function(_) => ResourceKind::Function,
            Self::NodePool(_) => ResourceKind::NodePool,
        }
    }

    /// Reject declarations that can never be provisioned.
    pub fn validate(&self) -> Result<(), AttributeError> {
        let invalid = |attr: &str, message: &str| AttributeError::InvalidValue {
            attr: attr.to_string(),
            message: message.to_string(),
        };
        match self {
            Self::Function(f) => {
                if f.body.trim().is_empty() {
                    return Err(invalid("body", "must not be empty"));
                }
                if f.replicas == 0 {
                    return Err(invalid("replicas", "must be at least 1"));
                }
            }
            Self::NodePool(p) => {
                if p.flavor.trim().is_empty() {
                    return Err(invalid("flavor", "must not be empty"));
                }
                if p.image.trim().is_empty() {
                    return Err(invalid("image", "must not be empty"));
                }
                if p.node_count == 0 {
                    return Err(invalid("node_count", "must be at least 1"));
                }
            }
        }
        Ok(())
    }

    /// Read an attribute by logical name. `None` when unset or null.
    pub fn get(&self, attr: &str) -> Option<serde_json::Value> {
        let value = match self {
            Self::Function(f) => serde_json::to_value(f),
            Self::NodePool(p) => serde_json::to_value(p),
        }
        .ok()?;
        value.get(attr).filter(|v| !v.is_null()).cloned()
    }

    /// Write an attribute by logical name.
    pub fn set(&mut self, attr: &str, value: serde_json::Value) -> Result<(), AttributeError> {
        let kind = self.kind();
        match self {
            Self::Function(f) => set_field(f, kind, attr, value),
            Self::NodePool(p) => set_field(p, kind, attr, value),
        }
    }

    /// Produce the attributes that result from applying `changes`.
    pub fn apply(&self, changes: &AttributeChanges) -> Result<Attributes, AttributeError> {
        match (self, changes) {
            (Self::Function(current), AttributeChanges::Function(c)) => {
                let mut next = current.clone();
                if let Some(body) = &c.body {
                    next.body = body.clone();
                }
                if let Some(description) = &c.description {
                    next.description = Some(description.clone());
                }
                if let Some(endpoint_id) = &c.endpoint_id {
                    next.endpoint_id = Some(endpoint_id.clone());
                }
                if let Some(nodepool_id) = c.nodepool_id {
                    next.nodepool_id = Some(nodepool_id);
                }
                if let Some(replicas) = c.replicas {
                    next.replicas = replicas;
                }
                Ok(Self::Function(next))
            }
            (Self::NodePool(current), AttributeChanges::NodePool(c)) => {
                let mut next = current.clone();
                if let Some(policy_id) = c.policy_id {
                    next.policy_id = Some(policy_id);
                }
                if let Some(host) = &c.host {
                    next.host = Some(host.clone());
                }
                if let Some(flavor) = &c.flavor {
                    next.flavor = flavor.clone();
                }
                if let Some(image) = &c.image {
                    next.image = image.clone();
                }
                if let Some(key_name) = &c.key_name {
                    next.key_name = Some(key_name.clone());
                }
                if let Some(node_count) = c.node_count {
                    next.node_count = node_count;
                }
                Ok(Self::NodePool(next))
            }
            (target, changes) => Err(AttributeError::KindMismatch {
                target: target.kind(),
                changes: changes.kind(),
            }),
        }
    }

    /// Fingerprint used to detect updates that change nothing.
    pub fn spec_hash(&self) -> SpecHash {
        SpecHash::of(self)
    }
}

fn set_field<T>(
    target: &mut T,
    kind: ResourceKind,
    attr: &str,
    value: serde_json::Value,
) -> Result<(), AttributeError>
where
    T: Serialize + DeserializeOwned,
{
    let invalid = |message: String| AttributeError::InvalidValue {
        attr: attr.to_string(),
        message,
    };
    let mut object = serde_json::to_value(&*target).map_err(|e| invalid(e.to_string()))?;
    let Some(fields) = object.as_object_mut() else {
        return Err(invalid("attributes are not an object".to_string()));
    };
    if !fields.contains_key(attr) {
        return Err(AttributeError::Unknown {
            kind,
            attr: attr.to_string(),
        });
    }
    fields.insert(attr.to_string(), value);
    *target = serde_json::from_value(object).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Requested changes to a function; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionChanges {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub nodepool_id: Option<NodePoolId>,
    #[serde(default)]
    pub replicas: Option<u32>,
}

/// Requested changes to a node pool; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolChanges {
    #[serde(default)]
    pub policy_id: Option<NodePoolPolicyId>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub node_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeChanges {
    Function(FunctionChanges),
    NodePool(NodePoolChanges),
}

impl AttributeChanges {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Function(_) => ResourceKind::Function,
            Self::NodePool(_) => ResourceKind::NodePool,
        }
    }
}

/// What a caller asks to create.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub name: String,
    pub owner: Owner,
    pub attributes: Attributes,
}

/// The persisted state of a function or node pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedResource {
    pub id: ResourceId,
    pub name: String,
    pub owner: Owner,
    /// Stack backing this resource; set once on create submission.
    pub stack_id: Option<StackId>,
    pub status: ResourceStatus,
    pub status_reason: Option<String>,
    pub attributes: Attributes,
    pub trust: Option<TrustCredentials>,
    /// Bumped by every submitted operation; loop writes are conditional on it.
    pub generation: Generation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        self.id.kind()
    }
}
