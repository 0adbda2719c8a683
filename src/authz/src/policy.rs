//! Policy definition and policy store loading

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::config::PolicyStoreSource;
use crate::error::{AuthzError, Result};

/// Unique policy identifier
pub type PolicyId = String;

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    /// Allow the action
    #[serde(alias = "allow", alias = "Allow")]
    Allow,
    /// Deny the action
    #[serde(alias = "deny", alias = "Deny")]
    Deny,
}

impl FromStr for PolicyEffect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(PolicyEffect::Allow),
            "deny" => Ok(PolicyEffect::Deny),
            other => Err(format!("invalid policy effect `{}`, should be `allow` or `deny`", other)),
        }
    }
}

/// Policy definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier
    pub id: PolicyId,

    /// Human readable description
    #[serde(default)]
    pub name: String,

    /// Policy effect (allow or deny)
    pub effect: PolicyEffect,

    /// Principal pattern (e.g., "*", "access_token:*")
    #[serde(default = "wildcard")]
    pub principal: String,

    /// Resource type pattern (e.g., "Issue", "Jans::*")
    #[serde(default = "wildcard")]
    pub resource: String,

    /// Action pattern (e.g., "Update", "*")
    #[serde(default = "wildcard")]
    pub action: String,

    /// Resource attributes that must be present with exactly these values
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub resource_attributes: Map<String, Value>,

    /// Token claims or principal attributes the matching principal must carry
    /// with exactly these values
    #[serde(default, alias = "principal_attributes", skip_serializing_if = "Map::is_empty")]
    pub principal_claims: Map<String, Value>,

    /// Policy priority (higher = evaluated first)
    #[serde(default)]
    pub priority: i32,
}

fn wildcard() -> String {
    "*".to_string()
}

/// Wildcard pattern compiled once at load time
#[derive(Clone)]
pub struct Pattern {
    raw: String,
    regex: Option<Regex>,
}

impl Pattern {
    /// Compile a pattern; `*` matches any run of characters
    pub fn new(raw: &str) -> Result<Self> {
        let regex = if raw != "*" && raw.contains('*') {
            let escaped: Vec<String> = raw.split('*').map(regex::escape).collect();
            let regex = Regex::new(&format!("^{}$", escaped.join(".*")))
                .map_err(|e| AuthzError::Config(format!("invalid pattern `{}`: {}", raw, e)))?;
            Some(regex)
        } else {
            None
        };

        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    /// Match a value against the pattern
    pub fn matches(&self, value: &str) -> bool {
        if self.raw == "*" {
            return true;
        }
        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => self.raw == value,
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.raw)
    }
}

/// A policy with its patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy: Policy,
    pub principal: Pattern,
    pub resource: Pattern,
    pub action: Pattern,
}

impl CompiledPolicy {
    fn compile(policy: Policy) -> Result<Self> {
        Ok(Self {
            principal: Pattern::new(&policy.principal)?,
            resource: Pattern::new(&policy.resource)?,
            action: Pattern::new(&policy.action)?,
            policy,
        })
    }

    /// Whether resource attribute constraints hold
    pub fn resource_attributes_match(&self, attributes: &Map<String, Value>) -> bool {
        self.policy
            .resource_attributes
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected))
    }

    /// Whether principal claim constraints hold
    pub fn claims_match(&self, claims: &Map<String, Value>) -> bool {
        self.policy
            .principal_claims
            .iter()
            .all(|(key, expected)| claims.get(key) == Some(expected))
    }
}

/// On-disk/inline document shape
#[derive(Debug, Deserialize)]
struct PolicyStoreDocument {
    #[serde(default)]
    policy_store_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    policies: Vec<Policy>,
}

/// Validated policy set, sorted by descending priority
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    /// Identifier declared by the store document
    pub id: Option<String>,

    /// Store name
    pub name: Option<String>,

    policies: Vec<CompiledPolicy>,
}

impl PolicySet {
    /// Validate and compile a list of policies
    pub fn new(policies: Vec<Policy>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(policies.len());

        for policy in policies {
            if policy.id.trim().is_empty() {
                return Err(AuthzError::Config("policy id must not be empty".to_string()));
            }
            if !seen.insert(policy.id.clone()) {
                return Err(AuthzError::Config(format!("duplicate policy id `{}`", policy.id)));
            }
            compiled.push(CompiledPolicy::compile(policy)?);
        }

        // Stable: equal priorities keep document order
        compiled.sort_by(|a, b| b.policy.priority.cmp(&a.policy.priority));

        Ok(Self {
            id: None,
            name: None,
            policies: compiled,
        })
    }

    /// Parse a policy store document
    pub fn from_value(value: Value) -> Result<Self> {
        let document: PolicyStoreDocument = serde_json::from_value(value)
            .map_err(|e| AuthzError::Config(format!("invalid policy store: {}", e)))?;
        Self::from_document(document)
    }

    fn from_document(document: PolicyStoreDocument) -> Result<Self> {
        let mut set = Self::new(document.policies)?;
        set.id = document.policy_store_id;
        set.name = document.name;
        Ok(set)
    }

    /// Policies in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPolicy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Loads the policy set an instance evaluates against
pub trait PolicyStoreLoader: Send + Sync {
    fn load(&self, source: &PolicyStoreSource) -> Result<PolicySet>;
}

/// Loader for inline documents and local JSON/YAML files
#[derive(Debug, Default, Clone, Copy)]
pub struct FilePolicyStoreLoader;

impl FilePolicyStoreLoader {
    fn read_file(path: &Path) -> Result<String> {
        debug!("Reading policy store from {}", path.display());
        Ok(std::fs::read_to_string(path)?)
    }
}

impl PolicyStoreLoader for FilePolicyStoreLoader {
    fn load(&self, source: &PolicyStoreSource) -> Result<PolicySet> {
        match source {
            PolicyStoreSource::Inline(value) => PolicySet::from_value(value.clone()),
            PolicyStoreSource::FileJson(path) => {
                let contents = Self::read_file(path)?;
                let document: PolicyStoreDocument =
                    serde_json::from_str(&contents).map_err(|e| {
                        AuthzError::Config(format!("invalid policy store `{}`: {}", path.display(), e))
                    })?;
                PolicySet::from_document(document)
            }
            PolicyStoreSource::FileYaml(path) => {
                let contents = Self::read_file(path)?;
                let document: PolicyStoreDocument =
                    serde_yaml::from_str(&contents).map_err(|e| {
                        AuthzError::Config(format!("invalid policy store `{}`: {}", path.display(), e))
                    })?;
                PolicySet::from_document(document)
            }
        }
    }
}
