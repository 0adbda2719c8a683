//! Evaluation request and outcome exchanged with the evaluation engine

use serde_json::{Map, Value};

use crate::types::{ActionId, Decision, Diagnostics, Principal, ResourceDescriptor};

/// Structured request handed to an [`EvaluationEngine`](super::EvaluationEngine)
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// Validated token subjects or caller-described entities
    pub principals: Vec<Principal>,

    /// Action being performed
    pub action: ActionId,

    /// Resource being accessed
    pub resource: ResourceDescriptor,

    /// Caller supplied context plus live context data under `data`
    pub context: Map<String, Value>,
}

impl EvaluationRequest {
    /// Principal ids in request order
    pub fn principal_ids(&self) -> Vec<String> {
        self.principals.iter().map(Principal::principal_id).collect()
    }
}

/// Decision plus diagnostics produced by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub decision: Decision,
    pub diagnostics: Diagnostics,
}

impl EvaluationOutcome {
    pub fn allow(diagnostics: Diagnostics) -> Self {
        Self {
            decision: Decision::Allow,
            diagnostics,
        }
    }

    pub fn deny(diagnostics: Diagnostics) -> Self {
        Self {
            decision: Decision::Deny,
            diagnostics,
        }
    }
}
