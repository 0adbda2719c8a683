//! Core authorization request and result types
//!
//! Requests arrive as JSON and are parsed exactly once into the typed
//! structures below; nothing downstream looks at raw request text again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{AuthzError, Result};
use crate::policy::PolicyId;

/// Action identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionId {
    /// Bare action name, e.g. `Update`
    Named(String),

    /// Namespaced action, e.g. `Jans::Action::"Update"`
    Qualified { namespace: String, name: String },
}

impl ActionId {
    /// Unqualified action name
    pub fn name(&self) -> &str {
        match self {
            ActionId::Named(name) => name,
            ActionId::Qualified { name, .. } => name,
        }
    }
}

impl FromStr for ActionId {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AuthzError::RequestParse("action must not be empty".to_string()));
        }

        match s.rsplit_once("::") {
            None => Ok(ActionId::Named(s.to_string())),
            Some((namespace, name)) => {
                let name = name
                    .strip_prefix('"')
                    .and_then(|n| n.strip_suffix('"'))
                    .unwrap_or(name);
                if namespace.is_empty() || name.is_empty() {
                    return Err(AuthzError::RequestParse(format!("invalid action `{}`", s)));
                }
                Ok(ActionId::Qualified {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionId::Named(name) => f.write_str(name),
            ActionId::Qualified { namespace, name } => write!(f, "{}::\"{}\"", namespace, name),
        }
    }
}

/// Resource being accessed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource type, optionally namespaced (e.g. `Jans::Issue`)
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resource identifier
    pub id: String,

    /// Additional attributes (e.g. owner, org_id)
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ResourceDescriptor {
    /// Resource type without its namespace
    pub fn short_type(&self) -> &str {
        self.resource_type
            .rsplit_once("::")
            .map(|(_, short)| short)
            .unwrap_or(&self.resource_type)
    }
}

/// Principal handed to the evaluation engine: a token subject or an entity
/// described by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Entity type (e.g. `Jans::User`) or token name
    #[serde(rename = "type")]
    pub principal_type: String,

    pub id: String,

    /// Attributes or token claims policies may constrain
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Principal {
    /// Id used for policy matching, `<type>:<id>`
    pub fn principal_id(&self) -> String {
        format!("{}:{}", self.principal_type, self.id)
    }
}

/// Token tagged with the entity type it maps to
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenInput {
    /// Entity type the token stands for (e.g. `Jans::Access_Token`)
    pub mapping: String,

    /// Encoded token
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct RawRequest<P> {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    tokens: P,
    action: String,
    resource: ResourceDescriptor,
    #[serde(default)]
    context: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RawUnsignedRequest {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    principals: Vec<Principal>,
    action: String,
    resource: ResourceDescriptor,
    #[serde(default)]
    context: Option<Map<String, Value>>,
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| AuthzError::RequestParse(e.to_string()))
}

/// Validate the resource and parse the action shared by every request shape
fn parse_target(action: &str, resource: &ResourceDescriptor) -> Result<ActionId> {
    if resource.resource_type.trim().is_empty() {
        return Err(AuthzError::RequestParse("resource type must not be empty".to_string()));
    }
    if resource.id.trim().is_empty() {
        return Err(AuthzError::RequestParse("resource id must not be empty".to_string()));
    }
    action.parse()
}

fn request_id(raw: Option<String>) -> Option<String> {
    raw.filter(|id| !id.trim().is_empty())
}

/// Authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Caller supplied correlation id
    pub request_id: Option<String>,

    /// Named bearer tokens (e.g. `access_token`)
    pub tokens: BTreeMap<String, String>,

    /// What action is being performed
    pub action: ActionId,

    /// What resource is being accessed
    pub resource: ResourceDescriptor,

    /// Additional context
    pub context: Map<String, Value>,
}

impl AuthorizationRequest {
    /// Parse and validate a JSON request
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawRequest<BTreeMap<String, String>> = decode(bytes)?;

        if raw.tokens.is_empty() {
            return Err(AuthzError::RequestParse("at least one token is required".to_string()));
        }
        if let Some((name, _)) = raw
            .tokens
            .iter()
            .find(|(name, token)| name.trim().is_empty() || token.trim().is_empty())
        {
            return Err(AuthzError::RequestParse(format!("token `{}` is empty", name)));
        }

        Ok(Self {
            action: parse_target(&raw.action, &raw.resource)?,
            request_id: request_id(raw.request_id),
            tokens: raw.tokens,
            resource: raw.resource,
            context: raw.context.unwrap_or_default(),
        })
    }
}

/// Request carrying a list of mapped tokens, possibly from several issuers.
/// Tokens that fail validation are skipped as long as one survives.
#[derive(Debug, Clone)]
pub struct MultiIssuerAuthorizationRequest {
    pub request_id: Option<String>,
    pub tokens: Vec<TokenInput>,
    pub action: ActionId,
    pub resource: ResourceDescriptor,
    pub context: Map<String, Value>,
}

impl MultiIssuerAuthorizationRequest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawRequest<Vec<TokenInput>> = decode(bytes)?;

        if raw.tokens.is_empty() {
            return Err(AuthzError::RequestParse("at least one token is required".to_string()));
        }
        if raw.tokens.iter().any(|token| token.mapping.trim().is_empty()) {
            return Err(AuthzError::RequestParse("token mapping must not be empty".to_string()));
        }

        Ok(Self {
            action: parse_target(&raw.action, &raw.resource)?,
            request_id: request_id(raw.request_id),
            tokens: raw.tokens,
            resource: raw.resource,
            context: raw.context.unwrap_or_default(),
        })
    }
}

/// Request naming its principals directly instead of through tokens
#[derive(Debug, Clone)]
pub struct UnsignedAuthorizationRequest {
    pub request_id: Option<String>,

    /// Principals in caller order; types are unique
    pub principals: Vec<Principal>,

    pub action: ActionId,
    pub resource: ResourceDescriptor,
    pub context: Map<String, Value>,
}

impl UnsignedAuthorizationRequest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawUnsignedRequest = decode(bytes)?;

        if raw.principals.is_empty() {
            return Err(AuthzError::RequestParse("at least one principal is required".to_string()));
        }
        let mut seen = HashSet::new();
        for principal in &raw.principals {
            if principal.principal_type.trim().is_empty() || principal.id.trim().is_empty() {
                return Err(AuthzError::RequestParse(
                    "principal type and id must not be empty".to_string(),
                ));
            }
            if !seen.insert(principal.principal_type.as_str()) {
                return Err(AuthzError::RequestParse(format!(
                    "principal type `{}` appears more than once",
                    principal.principal_type
                )));
            }
        }

        Ok(Self {
            action: parse_target(&raw.action, &raw.resource)?,
            request_id: request_id(raw.request_id),
            principals: raw.principals,
            resource: raw.resource,
            context: raw.context.unwrap_or_default(),
        })
    }
}

/// Authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "bool", from = "bool")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Lower-case label, also used as a log tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

impl From<Decision> for bool {
    fn from(decision: Decision) -> bool {
        decision.is_allowed()
    }
}

/// Why the engine decided the way it did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Policies whose principal, resource and action patterns applied
    #[serde(default)]
    pub considered: Vec<PolicyId>,

    /// Policies that determined the decision
    #[serde(default)]
    pub reason: Vec<PolicyId>,

    /// Non-fatal problems encountered while evaluating
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Decision for one principal of an unsigned request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalDecision {
    pub decision: Decision,
    pub diagnostics: Diagnostics,
}

/// Result of an unsigned request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedAuthorizationResult {
    pub request_id: String,

    /// Per-principal decisions combined by the instance's decision mode
    pub decision: Decision,

    /// Decisions keyed by principal type
    pub principals: BTreeMap<String, PrincipalDecision>,
}

/// Authorization result returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    /// Correlation id, caller supplied or generated
    pub request_id: String,

    /// Whether the request is allowed
    pub decision: Decision,

    /// Evaluation diagnostics
    pub diagnostics: Diagnostics,
}
