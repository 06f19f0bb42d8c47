//! Declarative status-transition tables
//!
//! Each workflow entity lists its legal `(from, action, to)` triples once.
//! Handlers call [`apply`] and never compare statuses by hand, so the legal
//! source states for an action live in exactly one place.

use std::fmt;
use thiserror::Error;

use crate::status::{
    AuditAction, AuditStatus, CapaAction, CapaStatus, IdeaAction, IdeaStatus, NcrAction,
    NcrStatus, TaskAction, TaskStatus,
};

/// A status enum with a transition table
pub trait Workflow: Copy + Eq + fmt::Display + 'static {
    type Action: Copy + Eq + fmt::Display + 'static;

    /// Entity name used in error messages ("idea", "audit", ...)
    const ENTITY: &'static str;

    /// Legal transitions as `(from, action, to)`
    const TRANSITIONS: &'static [(Self, Self::Action, Self)];
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {action} {entity} with status '{status}'")]
pub struct TransitionError {
    pub entity: &'static str,
    pub action: String,
    pub status: String,
}

impl From<TransitionError> for crate::Error {
    fn from(err: TransitionError) -> Self {
        crate::Error::InvalidInput(err.to_string())
    }
}

/// Target status for `action` taken from `current`
pub fn apply<W: Workflow>(current: W, action: W::Action) -> Result<W, TransitionError> {
    W::TRANSITIONS
        .iter()
        .find(|(from, act, _)| *from == current && *act == action)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| TransitionError {
            entity: W::ENTITY,
            action: action.to_string(),
            status: current.to_string(),
        })
}

/// Actions accepted from `current`, in table order
pub fn allowed_actions<W: Workflow>(current: W) -> Vec<W::Action> {
    W::TRANSITIONS
        .iter()
        .filter(|(from, _, _)| *from == current)
        .map(|(_, action, _)| *action)
        .collect()
}

impl Workflow for IdeaStatus {
    type Action = IdeaAction;
    const ENTITY: &'static str = "idea";
    const TRANSITIONS: &'static [(Self, IdeaAction, Self)] = &[
        (IdeaStatus::Submitted, IdeaAction::Review, IdeaStatus::UnderReview),
        (IdeaStatus::Submitted, IdeaAction::Approve, IdeaStatus::Approved),
        (IdeaStatus::UnderReview, IdeaAction::Approve, IdeaStatus::Approved),
        (IdeaStatus::Submitted, IdeaAction::Reject, IdeaStatus::Rejected),
        (IdeaStatus::UnderReview, IdeaAction::Reject, IdeaStatus::Rejected),
        (IdeaStatus::Approved, IdeaAction::Start, IdeaStatus::InProgress),
        (IdeaStatus::InProgress, IdeaAction::Implement, IdeaStatus::Implemented),
        (IdeaStatus::Implemented, IdeaAction::Close, IdeaStatus::Closed),
        (IdeaStatus::Rejected, IdeaAction::Close, IdeaStatus::Closed),
    ];
}

impl Workflow for TaskStatus {
    type Action = TaskAction;
    const ENTITY: &'static str = "task";
    const TRANSITIONS: &'static [(Self, TaskAction, Self)] = &[
        (TaskStatus::Pending, TaskAction::Complete, TaskStatus::Completed),
        (TaskStatus::InProgress, TaskAction::Complete, TaskStatus::Completed),
        (TaskStatus::Blocked, TaskAction::Complete, TaskStatus::Completed),
        (TaskStatus::Cancelled, TaskAction::Complete, TaskStatus::Completed),
    ];
}

impl Workflow for AuditStatus {
    type Action = AuditAction;
    const ENTITY: &'static str = "audit";
    const TRANSITIONS: &'static [(Self, AuditAction, Self)] = &[
        (AuditStatus::Planned, AuditAction::Start, AuditStatus::InProgress),
        (AuditStatus::InProgress, AuditAction::Complete, AuditStatus::Completed),
        (AuditStatus::Completed, AuditAction::Close, AuditStatus::Closed),
        (AuditStatus::Planned, AuditAction::Cancel, AuditStatus::Cancelled),
        (AuditStatus::InProgress, AuditAction::Cancel, AuditStatus::Cancelled),
    ];
}

impl Workflow for NcrStatus {
    type Action = NcrAction;
    const ENTITY: &'static str = "NCR";
    const TRANSITIONS: &'static [(Self, NcrAction, Self)] = &[
        (NcrStatus::Open, NcrAction::Investigate, NcrStatus::UnderInvestigation),
        (NcrStatus::UnderInvestigation, NcrAction::Resolve, NcrStatus::Resolved),
        (NcrStatus::Resolved, NcrAction::Reopen, NcrStatus::Open),
        (NcrStatus::Resolved, NcrAction::Close, NcrStatus::Closed),
        (NcrStatus::Open, NcrAction::Cancel, NcrStatus::Cancelled),
        (NcrStatus::UnderInvestigation, NcrAction::Cancel, NcrStatus::Cancelled),
    ];
}

impl Workflow for CapaStatus {
    type Action = CapaAction;
    const ENTITY: &'static str = "CAPA";
    const TRANSITIONS: &'static [(Self, CapaAction, Self)] = &[
        (CapaStatus::Open, CapaAction::Start, CapaStatus::InProgress),
        (CapaStatus::InProgress, CapaAction::Complete, CapaStatus::Completed),
        (CapaStatus::Completed, CapaAction::Verify, CapaStatus::Verified),
        (CapaStatus::Completed, CapaAction::Reopen, CapaStatus::InProgress),
        (CapaStatus::Verified, CapaAction::Close, CapaStatus::Closed),
    ];
}
