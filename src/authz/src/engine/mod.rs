//! Policy evaluation engine
//!
//! The runtime only talks to engines through [`EvaluationEngine`]. The
//! bundled [`PolicyEngine`] evaluates a priority-ordered [`PolicySet`]:
//! the first policy whose patterns and constraints apply decides, and the
//! configured default decision applies when none does.

pub mod decision;

pub use decision::{EvaluationOutcome, EvaluationRequest};

use thiserror::Error;
use tracing::debug;

use crate::policy::{CompiledPolicy, PolicyEffect, PolicySet};
use crate::types::Diagnostics;

/// Engine-reported failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// Policy data the engine depends on is unusable
    #[error("policy store is corrupted: {0}")]
    CorruptPolicyStore(String),

    /// Any other engine failure
    #[error("{0}")]
    Failed(String),
}

/// Decides allow/deny for a structured request
pub trait EvaluationEngine: Send + Sync {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationOutcome, EngineError>;
}

/// Pattern-matching engine over a [`PolicySet`]
pub struct PolicyEngine {
    policies: PolicySet,
    default_decision: PolicyEffect,
}

impl PolicyEngine {
    pub fn new(policies: PolicySet, default_decision: PolicyEffect) -> Self {
        debug!(
            "PolicyEngine initialized with {} policies, default={:?}",
            policies.len(),
            default_decision
        );
        Self {
            policies,
            default_decision,
        }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    fn targets(policy: &CompiledPolicy, request: &EvaluationRequest) -> bool {
        let resource_type = &request.resource.resource_type;
        let action = &request.action;

        (policy.resource.matches(resource_type) || policy.resource.matches(request.resource.short_type()))
            && (policy.action.matches(action.name()) || policy.action.matches(&action.to_string()))
            && request
                .principals
                .iter()
                .any(|principal| policy.principal.matches(&principal.principal_id()))
    }

    fn conditions_hold(policy: &CompiledPolicy, request: &EvaluationRequest) -> bool {
        policy.resource_attributes_match(&request.resource.attributes)
            && request.principals.iter().any(|principal| {
                policy.principal.matches(&principal.principal_id())
                    && policy.claims_match(&principal.attributes)
            })
    }
}

impl EvaluationEngine for PolicyEngine {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationOutcome, EngineError> {
        let mut diagnostics = Diagnostics::default();
        let mut winner = None;

        for policy in self.policies.iter() {
            if !Self::targets(policy, request) {
                continue;
            }
            diagnostics.considered.push(policy.policy.id.clone());

            if winner.is_none() && Self::conditions_hold(policy, request) {
                debug!(
                    "Policy '{}' (priority={}) decides {:?}",
                    policy.policy.id, policy.policy.priority, policy.policy.effect
                );
                winner = Some(policy);
            }
        }

        let effect = match winner {
            Some(policy) => {
                diagnostics.reason.push(policy.policy.id.clone());
                policy.policy.effect
            }
            None => {
                debug!("No policy matched, applying default {:?}", self.default_decision);
                self.default_decision
            }
        };

        Ok(match effect {
            PolicyEffect::Allow => EvaluationOutcome::allow(diagnostics),
            PolicyEffect::Deny => EvaluationOutcome::deny(diagnostics),
        })
    }
}
