//! Resource lifecycle status.
//!
//! Statuses mirror the orchestrator's `ACTION_PHASE` vocabulary verbatim so a
//! remote status can be persisted without translation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The operation a stack is (or was last) performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackAction {
    Init,
    Create,
    Update,
    Delete,
    Rollback,
    Suspend,
    Resume,
    Adopt,
    Snapshot,
    Check,
    Restore,
}

impl StackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Rollback => "ROLLBACK",
            Self::Suspend => "SUSPEND",
            Self::Resume => "RESUME",
            Self::Adopt => "ADOPT",
            Self::Snapshot => "SNAPSHOT",
            Self::Check => "CHECK",
            Self::Restore => "RESTORE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "INIT" => Self::Init,
            "CREATE" => Self::Create,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "ROLLBACK" => Self::Rollback,
            "SUSPEND" => Self::Suspend,
            "RESUME" => Self::Resume,
            "ADOPT" => Self::Adopt,
            "SNAPSHOT" => Self::Snapshot,
            "CHECK" => Self::Check,
            "RESTORE" => Self::Restore,
            _ => return None,
        })
    }
}

/// How far the action has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackPhase {
    InProgress,
    Complete,
    Failed,
}

impl StackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETE" => Some(Self::Complete),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Status of a managed resource, e.g. `CREATE_IN_PROGRESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceStatus {
    pub action: StackAction,
    pub phase: StackPhase,
}

impl ResourceStatus {
    pub const CREATE_IN_PROGRESS: Self = Self::new(StackAction::Create, StackPhase::InProgress);
    pub const CREATE_COMPLETE: Self = Self::new(StackAction::Create, StackPhase::Complete);
    pub const CREATE_FAILED: Self = Self::new(StackAction::Create, StackPhase::Failed);
    pub const UPDATE_IN_PROGRESS: Self = Self::new(StackAction::Update, StackPhase::InProgress);
    pub const UPDATE_COMPLETE: Self = Self::new(StackAction::Update, StackPhase::Complete);
    pub const UPDATE_FAILED: Self = Self::new(StackAction::Update, StackPhase::Failed);
    pub const DELETE_IN_PROGRESS: Self = Self::new(StackAction::Delete, StackPhase::InProgress);
    pub const DELETE_COMPLETE: Self = Self::new(StackAction::Delete, StackPhase::Complete);
    pub const DELETE_FAILED: Self = Self::new(StackAction::Delete, StackPhase::Failed);
    pub const RESUME_COMPLETE: Self = Self::new(StackAction::Resume, StackPhase::Complete);
    pub const RESTORE_COMPLETE: Self = Self::new(StackAction::Restore, StackPhase::Complete);
    pub const ROLLBACK_COMPLETE: Self = Self::new(StackAction::Rollback, StackPhase::Complete);
    pub const SNAPSHOT_COMPLETE: Self = Self::new(StackAction::Snapshot, StackPhase::Complete);
    pub const CHECK_COMPLETE: Self = Self::new(StackAction::Check, StackPhase::Complete);
    pub const ADOPT_COMPLETE: Self = Self::new(StackAction::Adopt, StackPhase::Complete);

    pub const fn new(action: StackAction, phase: StackPhase) -> Self {
        Self { action, phase }
    }

    pub fn is_in_progress(&self) -> bool {
        self.phase == StackPhase::InProgress
    }

    pub fn is_complete(&self) -> bool {
        self.phase == StackPhase::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.phase == StackPhase::Failed
    }

    /// Whether an update may be submitted from this status.
    pub fn is_update_allowed(&self) -> bool {
        self.is_complete()
            && matches!(
                self.action,
                StackAction::Create
                    | StackAction::Update
                    | StackAction::Resume
                    | StackAction::Restore
                    | StackAction::Rollback
                    | StackAction::Snapshot
                    | StackAction::Check
                    | StackAction::Adopt
            )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.action.as_str(), self.phase.as_str())
    }
}

/// A status string outside the orchestrator vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stack status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ResourceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownStatus(s.to_string());
        let (action, phase) = s.split_once('_').ok_or_else(unknown)?;
        Ok(Self::new(
            StackAction::parse(action).ok_or_else(unknown)?,
            StackPhase::parse(phase).ok_or_else(unknown)?,
        ))
    }
}

impl Serialize for ResourceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
