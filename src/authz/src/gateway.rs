//! Authorization gateway
//!
//! Turns raw request bytes into a decision for one instance and records the
//! decision in that instance's log store. Three request shapes share the
//! pipeline: named tokens, mapped tokens from several issuers, and unsigned
//! principals described by the caller.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::PrincipalDecisionMode;
use crate::engine::{EvaluationOutcome, EvaluationRequest};
use crate::error::{AuthzError, Result};
use crate::instance::Instance;
use crate::log_store::LogRecord;
use crate::types::{
    AuthorizationRequest, AuthorizationResult, Decision, Diagnostics, MultiIssuerAuthorizationRequest,
    Principal, PrincipalDecision, ResourceDescriptor, UnsignedAuthorizationRequest,
    UnsignedAuthorizationResult,
};

/// Tag carried by every decision entry
pub const TAG_AUTHORIZE: &str = "authorize";

/// Tag marking the entry as a decision record
pub const TAG_DECISION: &str = "decision";

/// Tag of decisions made for mapped tokens from several issuers
pub const TAG_MULTI_ISSUER: &str = "multi_issuer";

/// Tag of decisions made for caller-described principals
pub const TAG_UNSIGNED: &str = "unsigned";

/// Context key under which live context data reaches the engine
pub const DATA_CONTEXT_KEY: &str = "data";

/// Decision record stored as the log entry payload
#[derive(Debug, Serialize)]
struct DecisionRecord<'a> {
    request_id: &'a str,
    application_name: &'a str,
    policy_store_id: Option<&'a str>,
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<&'a Diagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    principal_decisions: Option<&'a BTreeMap<String, PrincipalDecision>>,
    action: String,
    resource: &'a ResourceDescriptor,
    principals: Vec<String>,
    timestamp: String,
}

/// Evaluate one JSON request with named tokens and return the JSON response
pub fn authorize(instance: &Instance, request_bytes: &[u8]) -> Result<Vec<u8>> {
    run(instance, || evaluate_signed(instance, request_bytes))
}

/// Evaluate a request carrying mapped tokens. Tokens that fail validation are
/// skipped and reported in the diagnostics; at least one has to survive.
pub fn authorize_multi_issuer(instance: &Instance, request_bytes: &[u8]) -> Result<Vec<u8>> {
    run(instance, || evaluate_multi_issuer(instance, request_bytes))
}

/// Evaluate every caller-described principal on its own and combine the
/// decisions with the instance's principal decision mode
pub fn authorize_unsigned(instance: &Instance, request_bytes: &[u8]) -> Result<Vec<u8>> {
    run(instance, || evaluate_unsigned(instance, request_bytes))
}

fn run(instance: &Instance, evaluate: impl FnOnce() -> Result<(Vec<u8>, Decision)>) -> Result<Vec<u8>> {
    if !instance.is_active() {
        return Err(AuthzError::InstanceNotFound(instance.id()));
    }

    let started = Instant::now();
    match evaluate() {
        Ok((response, decision)) => {
            instance.stats().record_decision(decision);
            debug!(
                "Instance {} decided {} in {:?}",
                instance.id(),
                decision.as_str(),
                started.elapsed()
            );
            Ok(response)
        }
        Err(err) => {
            instance.stats().record_failure();
            warn!("Instance {} rejected request ({}): {}", instance.id(), err.kind(), err);
            Err(err)
        }
    }
}

fn evaluate_signed(instance: &Instance, request_bytes: &[u8]) -> Result<(Vec<u8>, Decision)> {
    let request = AuthorizationRequest::parse(request_bytes)?;

    let principals = request
        .tokens
        .iter()
        .map(|(name, token)| instance.token_validator().validate(name, token).map(Principal::from))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AuthzError::TokenValidation(e.to_string()))?;

    let evaluation = EvaluationRequest {
        principals,
        action: request.action,
        resource: request.resource,
        context: with_context_data(instance, request.context),
    };
    let outcome = evaluate(instance, &evaluation)?;

    respond(instance, request.request_id, &evaluation, outcome, None)
}

fn evaluate_multi_issuer(instance: &Instance, request_bytes: &[u8]) -> Result<(Vec<u8>, Decision)> {
    let request = MultiIssuerAuthorizationRequest::parse(request_bytes)?;

    let mut principals = Vec::new();
    let mut skipped = Vec::new();
    for token in &request.tokens {
        match instance.token_validator().validate(&token.mapping, &token.payload) {
            Ok(claims) => principals.push(Principal::from(claims)),
            Err(err) => {
                debug!("Skipping token mapped to '{}': {}", token.mapping, err);
                skipped.push(err.to_string());
            }
        }
    }
    if principals.is_empty() {
        return Err(AuthzError::TokenValidation(format!(
            "none of the {} tokens is valid: {}",
            request.tokens.len(),
            skipped.join("; ")
        )));
    }

    let evaluation = EvaluationRequest {
        principals,
        action: request.action,
        resource: request.resource,
        context: with_context_data(instance, request.context),
    };
    let mut outcome = evaluate(instance, &evaluation)?;
    outcome
        .diagnostics
        .errors
        .extend(skipped.into_iter().map(|err| format!("ignored invalid token: {}", err)));

    respond(instance, request.request_id, &evaluation, outcome, Some(TAG_MULTI_ISSUER))
}

fn evaluate_unsigned(instance: &Instance, request_bytes: &[u8]) -> Result<(Vec<u8>, Decision)> {
    let request = UnsignedAuthorizationRequest::parse(request_bytes)?;
    let context = with_context_data(instance, request.context);

    let mut decisions = BTreeMap::new();
    for principal in &request.principals {
        let evaluation = EvaluationRequest {
            principals: vec![principal.clone()],
            action: request.action.clone(),
            resource: request.resource.clone(),
            context: context.clone(),
        };
        let outcome = evaluate(instance, &evaluation)?;
        decisions.insert(
            principal.principal_type.clone(),
            PrincipalDecision {
                decision: outcome.decision,
                diagnostics: outcome.diagnostics,
            },
        );
    }

    let decision = combine(instance.config().principal_decision_mode, decisions.values());
    let request_id = request_id_or_new(request.request_id);

    let record = DecisionRecord {
        request_id: &request_id,
        application_name: &instance.config().application_name,
        policy_store_id: instance.policy_store_id(),
        decision,
        diagnostics: None,
        principal_decisions: Some(&decisions),
        action: request.action.to_string(),
        resource: &request.resource,
        principals: request.principals.iter().map(Principal::principal_id).collect(),
        timestamp: Utc::now().to_rfc3339(),
    };
    record_decision(instance, &record, Some(TAG_UNSIGNED))?;

    let result = UnsignedAuthorizationResult {
        request_id,
        decision,
        principals: decisions,
    };
    Ok((serde_json::to_vec(&result)?, decision))
}

fn evaluate(instance: &Instance, evaluation: &EvaluationRequest) -> Result<EvaluationOutcome> {
    instance
        .engine()
        .evaluate(evaluation)
        .map_err(|e| AuthzError::Evaluation(e.to_string()))
}

fn combine<'a>(
    mode: PrincipalDecisionMode,
    mut decisions: impl Iterator<Item = &'a PrincipalDecision>,
) -> Decision {
    let allowed = |principal: &PrincipalDecision| principal.decision.is_allowed();
    match mode {
        PrincipalDecisionMode::All => decisions.all(allowed).into(),
        PrincipalDecisionMode::Any => decisions.any(allowed).into(),
    }
}

/// Offer live context data to the engine unless the caller already set the key
fn with_context_data(instance: &Instance, mut context: Map<String, Value>) -> Map<String, Value> {
    if !context.contains_key(DATA_CONTEXT_KEY) {
        let data = instance.data_store().values();
        if !data.is_empty() {
            context.insert(DATA_CONTEXT_KEY.to_string(), Value::Object(data));
        }
    }
    context
}

fn request_id_or_new(request_id: Option<String>) -> String {
    request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Record a token based decision and build its response
fn respond(
    instance: &Instance,
    request_id: Option<String>,
    evaluation: &EvaluationRequest,
    outcome: EvaluationOutcome,
    variant: Option<&str>,
) -> Result<(Vec<u8>, Decision)> {
    let request_id = request_id_or_new(request_id);

    let record = DecisionRecord {
        request_id: &request_id,
        application_name: &instance.config().application_name,
        policy_store_id: instance.policy_store_id(),
        decision: outcome.decision,
        diagnostics: Some(&outcome.diagnostics),
        principal_decisions: None,
        action: evaluation.action.to_string(),
        resource: &evaluation.resource,
        principals: evaluation.principal_ids(),
        timestamp: Utc::now().to_rfc3339(),
    };
    record_decision(instance, &record, variant)?;

    let decision = outcome.decision;
    let result = AuthorizationResult {
        request_id,
        decision,
        diagnostics: outcome.diagnostics,
    };
    Ok((serde_json::to_vec(&result)?, decision))
}

fn record_decision(instance: &Instance, record: &DecisionRecord<'_>, variant: Option<&str>) -> Result<()> {
    let payload = serde_json::to_vec(record)?;

    let mut entry = LogRecord::new(payload)
        .with_request_id(record.request_id)
        .with_tag(TAG_AUTHORIZE)
        .with_tag(TAG_DECISION)
        .with_tag(record.decision.as_str());
    if let Some(variant) = variant {
        entry = entry.with_tag(variant);
    }

    let log_id = instance.log_store().record(entry);
    debug!("Recorded log entry {} for request {}", log_id, record.request_id);
    Ok(())
}
