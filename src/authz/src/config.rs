//! Bootstrap configuration loading and validation
//!
//! Instances are configured from a flat JSON object with upper-case keys.
//! The same keys double as environment variable names for
//! [`BootstrapConfig::from_json_with_env`].

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AuthzError, Result};
use crate::policy::PolicyEffect;

/// Every key recognized by the bootstrap decoder
pub const CONFIG_KEYS: &[&str] = &[
    "AUTHZ_APPLICATION_NAME",
    "AUTHZ_POLICY_STORE_ID",
    "AUTHZ_POLICY_STORE_LOCAL",
    "AUTHZ_POLICY_STORE_LOCAL_FN",
    "AUTHZ_JWT_SIG_VALIDATION",
    "AUTHZ_LOG_TTL",
    "AUTHZ_LOG_MAX_ITEMS",
    "AUTHZ_DEFAULT_DECISION",
    "AUTHZ_PRINCIPAL_DECISION_MODE",
    "AUTHZ_DATA_MAX_ENTRIES",
    "AUTHZ_DATA_MAX_ENTRY_SIZE",
    "AUTHZ_DATA_DEFAULT_TTL",
    "AUTHZ_DATA_MAX_TTL",
];

const DEFAULT_LOG_TTL_SECS: u64 = 60;
const DEFAULT_DATA_MAX_ENTRIES: usize = 10_000;
const DEFAULT_DATA_MAX_ENTRY_SIZE: usize = 1024 * 1024;

/// Raw bootstrap properties as supplied by the caller
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfigRaw {
    /// Human friendly identifier for the application
    #[serde(rename = "AUTHZ_APPLICATION_NAME")]
    pub application_name: String,

    /// Identifier of the policy store, echoed into decision records
    #[serde(rename = "AUTHZ_POLICY_STORE_ID", default, deserialize_with = "non_empty_string")]
    pub policy_store_id: Option<String>,

    /// Inline policy set, either a JSON object or a JSON document in a string
    #[serde(rename = "AUTHZ_POLICY_STORE_LOCAL", default)]
    pub policy_store_local: Option<Value>,

    /// Path to a local policy store file (`.json`, `.yaml` or `.yml`)
    #[serde(rename = "AUTHZ_POLICY_STORE_LOCAL_FN", default, deserialize_with = "non_empty_string")]
    pub policy_store_local_fn: Option<String>,

    /// Whether token signatures must be validated
    #[serde(rename = "AUTHZ_JWT_SIG_VALIDATION", default)]
    pub jwt_sig_validation: FeatureToggle,

    /// Log entry time-to-live in seconds
    #[serde(rename = "AUTHZ_LOG_TTL", default, deserialize_with = "lenient_u64")]
    pub log_ttl: Option<u64>,

    /// Maximum number of live log entries per instance
    #[serde(rename = "AUTHZ_LOG_MAX_ITEMS", default, deserialize_with = "lenient_u64")]
    pub log_max_items: Option<u64>,

    /// Decision when no policy applies (`allow` or `deny`)
    #[serde(rename = "AUTHZ_DEFAULT_DECISION", default, deserialize_with = "non_empty_string")]
    pub default_decision: Option<String>,

    /// How per-principal decisions of an unsigned request combine (`all` or `any`)
    #[serde(rename = "AUTHZ_PRINCIPAL_DECISION_MODE", default, deserialize_with = "non_empty_string")]
    pub principal_decision_mode: Option<String>,

    /// Maximum number of entries in the context data store
    #[serde(rename = "AUTHZ_DATA_MAX_ENTRIES", default, deserialize_with = "lenient_u64")]
    pub data_max_entries: Option<u64>,

    /// Maximum serialized size of one data entry in bytes, 0 for unbounded
    #[serde(rename = "AUTHZ_DATA_MAX_ENTRY_SIZE", default, deserialize_with = "lenient_u64")]
    pub data_max_entry_size: Option<u64>,

    /// TTL in seconds for data pushed without one; unset means no expiry
    #[serde(rename = "AUTHZ_DATA_DEFAULT_TTL", default, deserialize_with = "lenient_u64")]
    pub data_default_ttl: Option<u64>,

    /// Upper bound in seconds for any data entry TTL
    #[serde(rename = "AUTHZ_DATA_MAX_TTL", default, deserialize_with = "lenient_u64")]
    pub data_max_ttl: Option<u64>,
}

/// Feature switch accepting `enabled`/`disabled` (any case) or a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "Value")]
pub enum FeatureToggle {
    #[default]
    Disabled,
    Enabled,
}

impl FeatureToggle {
    pub fn is_enabled(&self) -> bool {
        matches!(self, FeatureToggle::Enabled)
    }
}

impl TryFrom<Value> for FeatureToggle {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Bool(true) => Ok(FeatureToggle::Enabled),
            Value::Bool(false) => Ok(FeatureToggle::Disabled),
            Value::String(s) => match s.to_lowercase().as_str() {
                "enabled" | "true" => Ok(FeatureToggle::Enabled),
                "disabled" | "false" => Ok(FeatureToggle::Disabled),
                other => Err(format!(
                    "invalid feature toggle `{}`, should be `enabled` or `disabled`",
                    other
                )),
            },
            other => Err(format!("invalid feature toggle `{}`", other)),
        }
    }
}

/// Where the policy set comes from
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyStoreSource {
    /// Policy set supplied inline in the bootstrap config
    Inline(Value),
    /// Local JSON file
    FileJson(PathBuf),
    /// Local YAML file
    FileYaml(PathBuf),
}

/// Log store settings
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Time-to-live of every entry
    pub ttl: Duration,

    /// Capacity bound; oldest entries are evicted first
    pub max_items: Option<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_LOG_TTL_SECS),
            max_items: None,
        }
    }
}

/// Context data store settings
#[derive(Debug, Clone, PartialEq)]
pub struct DataStoreConfig {
    /// Capacity bound; pushes of new keys fail once it is reached
    pub max_entries: usize,

    /// Serialized size bound of one entry, 0 for unbounded
    pub max_entry_size: usize,

    /// TTL for entries pushed without one; `None` never expires
    pub default_ttl: Option<Duration>,

    /// Upper bound for explicit TTLs; defaults are capped to it
    pub max_ttl: Option<Duration>,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_DATA_MAX_ENTRIES,
            max_entry_size: DEFAULT_DATA_MAX_ENTRY_SIZE,
            default_ttl: None,
            max_ttl: None,
        }
    }
}

/// How the per-principal decisions of an unsigned request combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrincipalDecisionMode {
    /// Allowed only if every principal is allowed
    #[default]
    All,
    /// Allowed if at least one principal is allowed
    Any,
}

impl FromStr for PrincipalDecisionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(PrincipalDecisionMode::All),
            "any" => Ok(PrincipalDecisionMode::Any),
            other => Err(format!(
                "invalid principal decision mode `{}`, should be `all` or `any`",
                other
            )),
        }
    }
}

/// Validated bootstrap configuration snapshot held by every instance
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub application_name: String,
    pub policy_store_id: Option<String>,
    pub policy_store: PolicyStoreSource,
    pub jwt_sig_validation: bool,
    pub log: LogConfig,
    pub default_decision: PolicyEffect,
    pub principal_decision_mode: PrincipalDecisionMode,
    pub data: DataStoreConfig,
}

impl BootstrapConfig {
    /// Parse a bootstrap config from a JSON document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let map = parse_object(bytes)?;
        Self::from_map(map)
    }

    /// Parse an optional JSON document and overlay matching environment
    /// variables on top of it. Environment values win.
    pub fn from_json_with_env<I>(bytes: Option<&[u8]>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = match bytes {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => parse_object(bytes)?,
            _ => Map::new(),
        };

        for (key, value) in env {
            if CONFIG_KEYS.contains(&key.as_str()) {
                map.insert(key, Value::String(value));
            }
        }

        Self::from_map(map)
    }

    fn from_map(map: Map<String, Value>) -> Result<Self> {
        let raw: BootstrapConfigRaw = serde_json::from_value(Value::Object(map))
            .map_err(|e| AuthzError::Config(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Decode and validate raw bootstrap properties
    pub fn from_raw(raw: BootstrapConfigRaw) -> Result<Self> {
        let application_name = raw.application_name.trim().to_string();
        if application_name.is_empty() {
            return Err(AuthzError::Config(
                "`AUTHZ_APPLICATION_NAME` must not be empty".to_string(),
            ));
        }

        let policy_store = match (raw.policy_store_local, raw.policy_store_local_fn) {
            (None, None) => {
                return Err(AuthzError::Config(
                    "no policy store was provided, set `AUTHZ_POLICY_STORE_LOCAL` or `AUTHZ_POLICY_STORE_LOCAL_FN`"
                        .to_string(),
                ))
            }
            (Some(inline), None) => PolicyStoreSource::Inline(decode_inline_store(inline)?),
            (None, Some(path)) => file_source(&path)?,
            (Some(_), Some(_)) => {
                return Err(AuthzError::Config(
                    "only one of `AUTHZ_POLICY_STORE_LOCAL` or `AUTHZ_POLICY_STORE_LOCAL_FN` may be set"
                        .to_string(),
                ))
            }
        };

        let ttl_secs = raw.log_ttl.unwrap_or(DEFAULT_LOG_TTL_SECS);
        if ttl_secs == 0 {
            return Err(AuthzError::Config("`AUTHZ_LOG_TTL` must be greater than zero".to_string()));
        }

        let max_items = match raw.log_max_items {
            Some(0) => {
                return Err(AuthzError::Config(
                    "`AUTHZ_LOG_MAX_ITEMS` must be greater than zero".to_string(),
                ))
            }
            Some(n) => Some(usize::try_from(n).map_err(|_| {
                AuthzError::Config("`AUTHZ_LOG_MAX_ITEMS` is out of range".to_string())
            })?),
            None => None,
        };

        let default_decision = match raw.default_decision {
            Some(value) => value.parse::<PolicyEffect>().map_err(AuthzError::Config)?,
            None => PolicyEffect::Deny,
        };

        let principal_decision_mode = match raw.principal_decision_mode {
            Some(value) => value
                .parse::<PrincipalDecisionMode>()
                .map_err(AuthzError::Config)?,
            None => PrincipalDecisionMode::default(),
        };

        let data = data_store_config(
            raw.data_max_entries,
            raw.data_max_entry_size,
            raw.data_default_ttl,
            raw.data_max_ttl,
        )?;

        Ok(Self {
            application_name,
            policy_store_id: raw.policy_store_id,
            policy_store,
            jwt_sig_validation: raw.jwt_sig_validation.is_enabled(),
            log: LogConfig {
                ttl: Duration::from_secs(ttl_secs),
                max_items,
            },
            default_decision,
            principal_decision_mode,
            data,
        })
    }
}

fn data_store_config(
    max_entries: Option<u64>,
    max_entry_size: Option<u64>,
    default_ttl: Option<u64>,
    max_ttl: Option<u64>,
) -> Result<DataStoreConfig> {
    let out_of_range = |key: &str| AuthzError::Config(format!("`{}` is out of range", key));
    let positive = |key: &str, value: Option<u64>| match value {
        Some(0) => Err(AuthzError::Config(format!("`{}` must be greater than zero", key))),
        other => Ok(other),
    };

    let max_entries = match positive("AUTHZ_DATA_MAX_ENTRIES", max_entries)? {
        Some(n) => usize::try_from(n).map_err(|_| out_of_range("AUTHZ_DATA_MAX_ENTRIES"))?,
        None => DEFAULT_DATA_MAX_ENTRIES,
    };
    let max_entry_size = match max_entry_size {
        Some(n) => usize::try_from(n).map_err(|_| out_of_range("AUTHZ_DATA_MAX_ENTRY_SIZE"))?,
        None => DEFAULT_DATA_MAX_ENTRY_SIZE,
    };
    let default_ttl = positive("AUTHZ_DATA_DEFAULT_TTL", default_ttl)?.map(Duration::from_secs);
    let max_ttl = positive("AUTHZ_DATA_MAX_TTL", max_ttl)?.map(Duration::from_secs);

    if let (Some(default_ttl), Some(max_ttl)) = (default_ttl, max_ttl) {
        if default_ttl > max_ttl {
            return Err(AuthzError::Config(
                "`AUTHZ_DATA_DEFAULT_TTL` must not exceed `AUTHZ_DATA_MAX_TTL`".to_string(),
            ));
        }
    }

    Ok(DataStoreConfig {
        max_entries,
        max_entry_size,
        default_ttl,
        max_ttl,
    })
}

fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AuthzError::Config(format!("bootstrap config is not valid JSON: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AuthzError::Config(format!(
            "bootstrap config must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn decode_inline_store(value: Value) -> Result<Value> {
    match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| {
            AuthzError::Config(format!("`AUTHZ_POLICY_STORE_LOCAL` is not valid JSON: {}", e))
        }),
        Value::Object(_) => Ok(value),
        other => Err(AuthzError::Config(format!(
            "`AUTHZ_POLICY_STORE_LOCAL` must be an object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn file_source(raw_path: &str) -> Result<PolicyStoreSource> {
    let path = Path::new(raw_path);
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match ext.as_deref() {
        Some("json") => Ok(PolicyStoreSource::FileJson(path.into())),
        Some("yaml") | Some("yml") => Ok(PolicyStoreSource::FileYaml(path.into())),
        _ => Err(AuthzError::Config(format!(
            "unsupported policy store file format for `{}`, supported formats are JSON and YAML",
            raw_path
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `None` for missing, null or empty strings
fn non_empty_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Accepts a JSON number or its decimal string form
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("`{}` is not a non-negative integer", s))),
    }
}
