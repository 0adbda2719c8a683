//! End-to-end tests for the authorization runtime
//!
//! Instance creation → authorize → decision log queries → shutdown/drop

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cretoai_authz_runtime::{
    error_channel, AuthzError, InstanceBuilder, BootstrapConfig, Runtime, TokenClaims, TokenError,
    TokenValidator,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

fn jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.unverified-signature", header, payload)
}

fn issue_config() -> Vec<u8> {
    json!({
        "AUTHZ_APPLICATION_NAME": "My App",
        "AUTHZ_POLICY_STORE_ID": "issue-store",
        "AUTHZ_JWT_SIG_VALIDATION": "disabled",
        "AUTHZ_POLICY_STORE_LOCAL": {
            "policies": [
                {
                    "id": "allow-issue-update",
                    "name": "Members of the owning org may update issues",
                    "effect": "ALLOW",
                    "principal": "access_token:*",
                    "resource": "Issue",
                    "action": "Update",
                    "resource_attributes": { "org_id": "some_long_id" }
                }
            ]
        }
    })
    .to_string()
    .into_bytes()
}

fn issue_request(request_id: Option<&str>, org_id: &str) -> Vec<u8> {
    let mut request = json!({
        "tokens": {
            "access_token": jwt(json!({ "sub": "boG8dfc5MKTn37o7gsdCeyqL8LpWQtgoO41m1KZwdq0", "client_id": "d7f71bea" })),
            "id_token": jwt(json!({ "sub": "qzxn1Scrb9lWtGxVedMCky-Ql_ILspZaQA6fyuYktw0" })),
        },
        "action": "Jans::Action::\"Update\"",
        "resource": {
            "type": "Jans::Issue",
            "id": "random_id",
            "attributes": { "org_id": org_id, "country": "US" }
        },
        "context": {}
    });
    if let Some(id) = request_id {
        request["request_id"] = json!(id);
    }
    request.to_string().into_bytes()
}

// ============================================================================
// DECISION FLOW
// ============================================================================

#[test]
fn test_issue_update_allowed_and_logged() {
    let runtime = Runtime::new();
    let id = runtime.new_instance(&issue_config()).unwrap();

    let response = runtime.authorize(id, &issue_request(None, "some_long_id")).unwrap();
    let response: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(response["decision"], json!(true));
    let request_id = response["request_id"].as_str().unwrap().to_string();

    let ids = runtime.get_log_ids(id);
    assert_eq!(ids.len(), 1);

    let by_id = runtime.get_log_by_id(id, &ids[0]).unwrap().to_json();
    assert_eq!(by_id["request_id"], json!(request_id));
    assert_eq!(by_id["payload"]["decision"], json!(true));
    assert_eq!(by_id["payload"]["request_id"], json!(request_id));
    assert_eq!(by_id["payload"]["policy_store_id"], json!("issue-store"));

    let by_request = runtime.get_logs_by_request_id(id, &request_id);
    assert_eq!(by_request.len(), 1);
    assert_eq!(by_request[0].to_json(), by_id);

    assert_eq!(runtime.get_logs_by_request_id_and_tag(id, &request_id, "allow").len(), 1);
    assert!(runtime.get_logs_by_request_id_and_tag(id, &request_id, "deny").is_empty());
}

#[test]
fn test_attribute_mismatch_denied() {
    let runtime = Runtime::new();
    let id = runtime.new_instance(&issue_config()).unwrap();

    let response = runtime
        .authorize(id, &issue_request(Some("other-org"), "another_org"))
        .unwrap();
    let response: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(response["decision"], json!(false));
    assert_eq!(response["request_id"], json!("other-org"));
    assert_eq!(response["diagnostics"]["considered"], json!(["allow-issue-update"]));
    assert_eq!(response["diagnostics"]["reason"], json!([]));

    assert_eq!(runtime.get_logs_by_tag(id, "deny").len(), 1);
}

#[test]
fn test_malformed_request_adds_no_entry() {
    let runtime = Runtime::new();
    let id = runtime.new_instance(&issue_config()).unwrap();
    runtime.authorize(id, &issue_request(Some("ok"), "some_long_id")).unwrap();

    error_channel::clear();
    let malformed: [&[u8]; 4] = [
        b"",
        b"{ not json",
        br#"{"tokens": {}, "action": "Update", "resource": {"type": "Issue", "id": "1"}}"#,
        br#"{"tokens": {"access_token": "a.b.c"}, "action": "", "resource": {"type": "Issue", "id": "1"}}"#,
    ];
    for body in malformed {
        let err = runtime.authorize(id, body).unwrap_err();
        assert!(matches!(err, AuthzError::RequestParse(_)), "{:?}", err);
        assert!(!error_channel::get().unwrap_or_default().is_empty());
    }

    assert_eq!(runtime.get_log_ids(id).len(), 1);
    error_channel::clear();
}

// ============================================================================
// LOG QUERIES
// ============================================================================

#[test]
fn test_pop_logs_is_destructive() {
    let runtime = Runtime::new();
    let id = runtime.new_instance(&issue_config()).unwrap();
    for i in 0..3 {
        runtime
            .authorize(id, &issue_request(Some(&format!("req-{}", i)), "some_long_id"))
            .unwrap();
    }

    let popped = runtime.pop_logs(id);
    assert_eq!(popped.len(), 3);
    assert!(popped.windows(2).all(|w| w[0].id < w[1].id));
    assert!(runtime.pop_logs(id).is_empty());
    assert!(runtime.get_log_ids(id).is_empty());
}

#[test]
fn test_queries_on_dropped_handle() {
    let runtime = Runtime::new();
    let id = runtime.new_instance(&issue_config()).unwrap();
    runtime.authorize(id, &issue_request(Some("gone"), "some_long_id")).unwrap();
    let log_id = runtime.get_log_ids(id).remove(0);

    runtime.drop_instance(id);
    runtime.drop_instance(id);

    assert!(runtime.pop_logs(id).is_empty());
    assert!(runtime.get_log_ids(id).is_empty());
    assert!(runtime.get_logs_by_tag(id, "authorize").is_empty());
    assert!(runtime.get_logs_by_request_id(id, "gone").is_empty());
    assert!(runtime.get_logs_by_request_id_and_tag(id, "gone", "allow").is_empty());
    assert!(matches!(
        runtime.get_log_by_id(id, &log_id),
        Err(AuthzError::InstanceNotFound(_))
    ));
    assert!(matches!(
        runtime.authorize(id, &issue_request(None, "some_long_id")),
        Err(AuthzError::InstanceNotFound(_))
    ));
    error_channel::clear();
}

#[test]
fn test_max_items_bound() {
    let runtime = Runtime::new();
    let mut config: Value = serde_json::from_slice(&issue_config()).unwrap();
    config["AUTHZ_LOG_MAX_ITEMS"] = json!(2);
    let id = runtime.new_instance(config.to_string().as_bytes()).unwrap();

    for i in 0..4 {
        runtime
            .authorize(id, &issue_request(Some(&format!("r{}", i)), "some_long_id"))
            .unwrap();
    }
    assert_eq!(runtime.get_log_ids(id), vec!["3".to_string(), "4".to_string()]);
    assert!(runtime.get_logs_by_request_id(id, "r0").is_empty());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_policy_store_file_errors() {
    let runtime = Runtime::new();

    let missing = json!({
        "AUTHZ_APPLICATION_NAME": "App",
        "AUTHZ_POLICY_STORE_LOCAL_FN": "/nonexistent/authz/policy-store.json",
    });
    assert!(matches!(
        runtime.new_instance(missing.to_string().as_bytes()),
        Err(AuthzError::Io(_))
    ));

    let unsupported = json!({
        "AUTHZ_APPLICATION_NAME": "App",
        "AUTHZ_POLICY_STORE_LOCAL_FN": "/etc/authz/policy-store.xml",
    });
    assert!(matches!(
        runtime.new_instance(unsupported.to_string().as_bytes()),
        Err(AuthzError::Config(_))
    ));
    assert!(runtime.registry().is_empty());
    error_channel::clear();
}

#[test]
fn test_policy_store_from_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    write!(
        file,
        "policy_store_id: from-yaml\npolicies:\n  - id: deny-delete\n    effect: DENY\n    action: Delete\n  - id: allow-rest\n    effect: ALLOW\n    priority: -1\n"
    )
    .unwrap();

    let config = json!({
        "AUTHZ_APPLICATION_NAME": "App",
        "AUTHZ_POLICY_STORE_LOCAL_FN": file.path().to_string_lossy(),
    });
    let runtime = Runtime::new();
    let id = runtime.new_instance(config.to_string().as_bytes()).unwrap();

    let response = runtime.authorize(id, &issue_request(None, "x")).unwrap();
    let response: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(response["decision"], json!(true));
    assert_eq!(response["diagnostics"]["reason"], json!(["allow-rest"]));

    let entry = runtime.get_logs_by_tag(id, "allow").remove(0).to_json();
    assert_eq!(entry["payload"]["policy_store_id"], json!("from-yaml"));
}

struct RejectingValidator;

impl TokenValidator for RejectingValidator {
    fn validate(&self, name: &str, _token: &str) -> Result<TokenClaims, TokenError> {
        Err(TokenError::Rejected {
            name: name.to_string(),
            reason: "signature mismatch".to_string(),
        })
    }
}

#[test]
fn test_injected_validator() {
    let mut config: Value = serde_json::from_slice(&issue_config()).unwrap();
    config["AUTHZ_JWT_SIG_VALIDATION"] = json!("enabled");
    let config = BootstrapConfig::from_json(config.to_string().as_bytes()).unwrap();

    let runtime = Runtime::new();
    assert!(matches!(
        runtime.create(InstanceBuilder::new(config.clone())),
        Err(AuthzError::Config(_))
    ));

    let id = runtime
        .create(InstanceBuilder::new(config).with_token_validator(Arc::new(RejectingValidator)))
        .unwrap();
    let err = runtime.authorize(id, &issue_request(None, "some_long_id")).unwrap_err();
    assert!(matches!(err, AuthzError::TokenValidation(ref msg) if msg.contains("signature mismatch")));
    assert!(runtime.get_log_ids(id).is_empty());
    error_channel::clear();
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_error_channel_is_per_thread() {
    let runtime = Arc::new(Runtime::new());
    let id = runtime.new_instance(&issue_config()).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [
        (id, b"{ broken".to_vec()),
        (id + 1_000_000, issue_request(None, "some_long_id")),
    ]
    .into_iter()
    .map(|(target, body)| {
        let runtime = Arc::clone(&runtime);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            error_channel::clear();
            barrier.wait();
            let err = runtime.authorize(target, &body).unwrap_err();
            barrier.wait();
            (err.kind(), error_channel::get().unwrap_or_default())
        })
    })
    .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0].0, "request_parse");
    assert!(results[0].1.contains("Malformed authorization request"));
    assert_eq!(results[1].0, "instance_not_found");
    assert!(results[1].1.contains("Instance not found"));
}

#[test]
fn test_concurrent_authorize_keeps_ids_unique() {
    let runtime = Arc::new(Runtime::new());
    let id = runtime.new_instance(&issue_config()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || {
                for i in 0..25 {
                    runtime
                        .authorize(id, &issue_request(Some(&format!("t{}-{}", t, i)), "some_long_id"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids: Vec<u64> = runtime
        .get_log_ids(id)
        .iter()
        .map(|id| id.parse().unwrap())
        .collect();
    assert_eq!(ids, (1..=200).collect::<Vec<u64>>());
    assert_eq!(runtime.stats(id).unwrap().allowed_decisions, 200);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_instance_ids_increase(count in 1usize..8, drop_mask in any::<u8>()) {
        let runtime = Runtime::new();
        let mut previous = 0;
        for i in 0..count {
            let id = runtime.new_instance(&issue_config()).unwrap();
            prop_assert!(id > previous);
            previous = id;
            if drop_mask & (1 << i) != 0 {
                runtime.drop_instance(id);
            }
        }
    }
}
