//! Typed ID definitions for managed resources.

use crate::{define_id, split_prefixed, IdError};

define_id!(FunctionId, "fn");
define_id!(NodePoolId, "np");
define_id!(NodePoolPolicyId, "npp");
define_id!(RequestId, "req");

/// The kinds of resource whose lifecycle is driven through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Function,
    NodePool,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::NodePool => "node_pool",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "node_pool" => Ok(Self::NodePool),
            other => Err(IdError::UnknownPrefix(other.to_string())),
        }
    }
}

/// Identifier of any managed resource, dispatched on its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceId {
    Function(FunctionId),
    NodePool(NodePoolId),
}

impl ResourceId {
    /// Mint a fresh id for the given kind.
    pub fn new(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Function => Self::Function(FunctionId::new()),
            ResourceKind::NodePool => Self::NodePool(NodePoolId::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Function(_) => ResourceKind::Function,
            Self::NodePool(_) => ResourceKind::NodePool,
        }
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let (prefix, ulid) = split_prefixed(s)?;
        match prefix {
            p if p == FunctionId::PREFIX => Ok(Self::Function(FunctionId::from_ulid(ulid))),
            p if p == NodePoolId::PREFIX => Ok(Self::NodePool(NodePoolId::from_ulid(ulid))),
            other => Err(IdError::UnknownPrefix(other.to_string())),
        }
    }
}

impl From<FunctionId> for ResourceId {
    fn from(id: FunctionId) -> Self {
        Self::Function(id)
    }
}

impl From<NodePoolId> for ResourceId {
    fn from(id: NodePoolId) -> Self {
        Self::NodePool(id)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(id) => id.fmt(f),
            Self::NodePool(id) => id.fmt(f),
        }
    }
}

impl std::str::FromStr for ResourceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_function_id_prefix() {
        let id = FunctionId::new();
        assert!(id.to_string().starts_with("fn_"));
    }

    #[test]
    fn test_function_id_rejects_node_pool_prefix() {
        let result: Result<FunctionId, _> = "np_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidPrefix { expected: "fn", .. }
        ));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<NodePoolId, _> = "np01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<NodePoolPolicyId, _> = "".parse();
        assert_eq!(result.unwrap_err(), IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<FunctionId, _> = "fn_invalid".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_resource_id_dispatches_on_prefix() {
        let np = NodePoolId::new();
        let parsed: ResourceId = np.to_string().parse().unwrap();
        assert_eq!(parsed, ResourceId::NodePool(np));
        assert_eq!(parsed.kind(), ResourceKind::NodePool);

        let err = ResourceId::parse("npp_01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_resource_id_json() {
        let id = ResourceId::new(ResourceKind::Function);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with("\"fn_"));
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            FunctionId::PREFIX,
            NodePoolId::PREFIX,
            NodePoolPolicyId::PREFIX,
            RequestId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in "\\PC*") {
            let _ = ResourceId::parse(&s);
        }

        #[test]
        fn prop_display_parses_back(raw in any::<u128>()) {
            let id = FunctionId::from_ulid(crate::Ulid(raw));
            prop_assert_eq!(id.to_string().parse::<FunctionId>().unwrap(), id);
        }
    }
}
