//! Per-request state machine.

use crate::error::ErrorCode;

/// Stage of a request as it moves through the orchestrator.
///
/// Happy path: `Received -> Validated -> Normalized -> Inferred -> Responded`.
/// `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStage {
    /// Body received, not yet parsed.
    #[default]
    Received,
    /// Path parsed and checked against the filesystem and allowlist.
    Validated,
    /// Normalized temp file exists and is owned by the request.
    Normalized,
    /// Stems written and collected.
    Inferred,
    /// Result handed back to the transport.
    Responded,
    /// Request ended with an error of the given kind.
    Failed(ErrorCode),
}

impl RequestStage {
    /// Returns the string representation of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStage::Received => "received",
            RequestStage::Validated => "validated",
            RequestStage::Normalized => "normalized",
            RequestStage::Inferred => "inferred",
            RequestStage::Responded => "responded",
            RequestStage::Failed(_) => "failed",
        }
    }

    /// Returns true if the request is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStage::Responded | RequestStage::Failed(_))
    }

    /// Returns the next stage on the happy path.
    pub fn next(&self) -> Option<RequestStage> {
        match self {
            RequestStage::Received => Some(RequestStage::Validated),
            RequestStage::Validated => Some(RequestStage::Normalized),
            RequestStage::Normalized => Some(RequestStage::Inferred),
            RequestStage::Inferred => Some(RequestStage::Responded),
            RequestStage::Responded | RequestStage::Failed(_) => None,
        }
    }

    /// Returns true if moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: RequestStage) -> bool {
        match to {
            RequestStage::Failed(_) => !self.is_terminal(),
            other => self.next() == Some(other),
        }
    }

    /// Moves to `to` if the transition is legal.
    ///
    /// Returns true if the stage changed.
    pub fn advance(&mut self, to: RequestStage) -> bool {
        if self.can_transition_to(to) {
            *self = to;
            true
        } else {
            debug_assert!(false, "illegal stage transition {:?} -> {:?}", self, to);
            false
        }
    }
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStage::Failed(code) => write!(f, "failed({})", code),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
