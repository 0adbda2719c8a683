//! # CretoAI Authorization Runtime C ABI
//!
//! Every entry point takes plain data and returns an integer status (0 is
//! success). Inputs are `ptr`/`len` pairs; a null pointer with a nonzero
//! length is rejected as [`AuthzStatus::InvalidArgument`]. Outputs are
//! caller-owned records released through the matching `*_free` function.
//! Panics are caught at the boundary and reported as
//! [`AuthzStatus::InternalError`].

mod records;

pub use records::{
    authz_instance_result_free, authz_result_free, authz_string_array_free, AuthzBytes,
    AuthzInstanceResult, AuthzResult, AuthzStringArray,
};

use serde::Serialize;
use std::ffi::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use cretoai_authz_runtime::{
    error_channel, lifecycle, AuthzError, InstanceId, LogEntry, Runtime,
};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Stable status codes
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthzStatus {
    Ok = 0,
    ConfigError = 1,
    InstanceNotFound = 2,
    RequestParseError = 3,
    EvaluationError = 4,
    IoError = 5,
    InternalError = 6,
    TokenValidationError = 7,
    InvalidArgument = 8,
    LogEntryNotFound = 9,
    DataError = 10,
}

impl From<&AuthzError> for AuthzStatus {
    fn from(err: &AuthzError) -> Self {
        match err {
            AuthzError::Config(_) => AuthzStatus::ConfigError,
            AuthzError::InstanceNotFound(_) => AuthzStatus::InstanceNotFound,
            AuthzError::RequestParse(_) => AuthzStatus::RequestParseError,
            AuthzError::TokenValidation(_) => AuthzStatus::TokenValidationError,
            AuthzError::Evaluation(_) => AuthzStatus::EvaluationError,
            AuthzError::LogEntryNotFound(_) => AuthzStatus::LogEntryNotFound,
            AuthzError::Data(_) => AuthzStatus::DataError,
            AuthzError::Io(_) => AuthzStatus::IoError,
            AuthzError::Internal(_) => AuthzStatus::InternalError,
        }
    }
}

/// Values an entry point can return when it fails before producing output
trait Failure {
    fn failure(status: AuthzStatus, message: &str) -> Self;
}

impl Failure for AuthzStatus {
    fn failure(status: AuthzStatus, _message: &str) -> Self {
        status
    }
}

impl Failure for AuthzResult {
    fn failure(status: AuthzStatus, message: &str) -> Self {
        AuthzResult::failure(status, message)
    }
}

impl Failure for AuthzInstanceResult {
    fn failure(status: AuthzStatus, message: &str) -> Self {
        AuthzInstanceResult::failure(status, message)
    }
}

impl Failure for AuthzStringArray {
    fn failure(status: AuthzStatus, _message: &str) -> Self {
        AuthzStringArray::failure(status)
    }
}

/// Record a boundary failure in the error channel and build the return value
fn fail<T: Failure>(status: AuthzStatus, message: &str) -> T {
    error_channel::set(message);
    T::failure(status, message)
}

fn from_error<T: Failure>(err: &AuthzError) -> T {
    // The runtime has already filled the error channel
    T::failure(AuthzStatus::from(err), &err.to_string())
}

/// Serialize a runtime result as the JSON payload of an [`AuthzResult`]
fn json_result<T: Serialize>(result: Result<T, AuthzError>) -> AuthzResult {
    match result {
        Ok(value) => match serde_json::to_vec(&value) {
            Ok(json) => AuthzResult::ok(json),
            Err(err) => fail(
                AuthzStatus::InternalError,
                &format!("Internal error: serialization failed: {}", err),
            ),
        },
        Err(err) => from_error(&err),
    }
}

fn guard<T: Failure>(entry_point: &str, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            error!("Panic caught in {}", entry_point);
            fail(
                AuthzStatus::InternalError,
                &format!("Internal error: panic in {}", entry_point),
            )
        }
    }
}

/// Borrow a caller buffer. Null is only valid together with a zero length.
unsafe fn input<'a>(ptr: *const u8, len: usize, what: &str) -> Result<&'a [u8], String> {
    if ptr.is_null() {
        if len == 0 {
            Ok(&[])
        } else {
            Err(format!("Invalid argument: `{}` is null with length {}", what, len))
        }
    } else {
        Ok(std::slice::from_raw_parts(ptr, len))
    }
}

unsafe fn input_str<'a>(ptr: *const u8, len: usize, what: &str) -> Result<&'a str, String> {
    let bytes = input(ptr, len, what)?;
    std::str::from_utf8(bytes).map_err(|_| format!("Invalid argument: `{}` is not UTF-8", what))
}

/// Runtime for handle-based calls; before init every handle is unknown
fn runtime_for(id: InstanceId) -> Result<Arc<Runtime>, AuthzError> {
    lifecycle::runtime().ok_or_else(|| {
        let err = AuthzError::InstanceNotFound(id);
        error_channel::set(err.to_string());
        err
    })
}

fn envelopes(entries: Vec<Arc<LogEntry>>) -> Vec<Vec<u8>> {
    entries.iter().map(|entry| entry.to_json_bytes()).collect()
}

/// Collection query: unknown handles and an uninitialized runtime read as empty
fn query_logs(query: impl FnOnce(&Runtime) -> Vec<Vec<u8>>) -> AuthzStringArray {
    match lifecycle::runtime() {
        Some(runtime) => AuthzStringArray::ok(query(&runtime)),
        None => AuthzStringArray::ok(Vec::new()),
    }
}

/// Initialize the process-wide runtime and logging. Idempotent.
#[no_mangle]
pub extern "C" fn authz_init() -> AuthzStatus {
    guard("authz_init", || {
        lifecycle::process_init();
        AuthzStatus::Ok
    })
}

/// Drop every instance and release process-wide state. Idempotent.
#[no_mangle]
pub extern "C" fn authz_cleanup() -> AuthzStatus {
    guard("authz_cleanup", || {
        lifecycle::process_cleanup();
        AuthzStatus::Ok
    })
}

/// Static NUL-terminated version string
#[no_mangle]
pub extern "C" fn authz_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Create an instance from a JSON bootstrap config.
///
/// # Safety
/// `config` must be null or valid for reads of `config_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_new(config: *const u8, config_len: usize) -> AuthzInstanceResult {
    guard("authz_new", || {
        let config = match input(config, config_len, "config") {
            Ok(config) => config,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        match lifecycle::runtime_or_init().new_instance(config) {
            Ok(id) => AuthzInstanceResult::ok(id),
            Err(err) => from_error(&err),
        }
    })
}

/// Create an instance from an optional JSON config overlaid with `AUTHZ_*`
/// environment variables. A null or empty config means environment only.
///
/// # Safety
/// `config` must be null or valid for reads of `config_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_new_with_env(
    config: *const u8,
    config_len: usize,
) -> AuthzInstanceResult {
    guard("authz_new_with_env", || {
        let config = match input(config, config_len, "config") {
            Ok(config) if config.is_empty() => None,
            Ok(config) => Some(config),
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        match lifecycle::runtime_or_init().new_instance_with_env(config) {
            Ok(id) => AuthzInstanceResult::ok(id),
            Err(err) => from_error(&err),
        }
    })
}

/// Shared body of the authorize entry points
unsafe fn decide(
    entry_point: &str,
    instance_id: u64,
    request: *const u8,
    request_len: usize,
    op: impl FnOnce(&Runtime, &[u8]) -> Result<Vec<u8>, AuthzError>,
) -> AuthzResult {
    guard(entry_point, || {
        let request = match input(request, request_len, "request") {
            Ok(request) => request,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        match runtime_for(instance_id).and_then(|runtime| op(&runtime, request)) {
            Ok(response) => AuthzResult::ok(response),
            Err(err) => from_error(&err),
        }
    })
}

/// Evaluate a JSON authorization request; `data` holds the JSON response.
///
/// # Safety
/// `request` must be null or valid for reads of `request_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_authorize(
    instance_id: u64,
    request: *const u8,
    request_len: usize,
) -> AuthzResult {
    decide("authz_authorize", instance_id, request, request_len, |runtime, request| {
        runtime.authorize(instance_id, request)
    })
}

/// Evaluate a request whose `tokens` is a list of `{ mapping, payload }`.
/// Invalid tokens are skipped and listed in `diagnostics.errors`.
///
/// # Safety
/// `request` must be null or valid for reads of `request_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_authorize_multi_issuer(
    instance_id: u64,
    request: *const u8,
    request_len: usize,
) -> AuthzResult {
    decide(
        "authz_authorize_multi_issuer",
        instance_id,
        request,
        request_len,
        |runtime, request| runtime.authorize_multi_issuer(instance_id, request),
    )
}

/// Evaluate a request naming its `principals` directly; the response holds
/// one decision per principal type plus the combined decision.
///
/// # Safety
/// `request` must be null or valid for reads of `request_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_authorize_unsigned(
    instance_id: u64,
    request: *const u8,
    request_len: usize,
) -> AuthzResult {
    decide(
        "authz_authorize_unsigned",
        instance_id,
        request,
        request_len,
        |runtime, request| runtime.authorize_unsigned(instance_id, request),
    )
}

/// Remove and return every live log entry as JSON envelopes.
#[no_mangle]
pub extern "C" fn authz_pop_logs(instance_id: u64) -> AuthzStringArray {
    guard("authz_pop_logs", || {
        query_logs(|runtime| envelopes(runtime.pop_logs(instance_id)))
    })
}

/// Ids of every live log entry.
#[no_mangle]
pub extern "C" fn authz_get_log_ids(instance_id: u64) -> AuthzStringArray {
    guard("authz_get_log_ids", || {
        query_logs(|runtime| {
            runtime
                .get_log_ids(instance_id)
                .into_iter()
                .map(String::into_bytes)
                .collect()
        })
    })
}

/// Live log entries carrying `tag`.
///
/// # Safety
/// `tag` must be null or valid for reads of `tag_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_get_logs_by_tag(
    instance_id: u64,
    tag: *const u8,
    tag_len: usize,
) -> AuthzStringArray {
    guard("authz_get_logs_by_tag", || {
        let tag = match input_str(tag, tag_len, "tag") {
            Ok(tag) => tag,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        query_logs(|runtime| {
            envelopes(runtime.get_logs_by_tag(instance_id, tag))
        })
    })
}

/// Live log entries produced by `request_id`.
///
/// # Safety
/// `request_id` must be null or valid for reads of `request_id_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_get_logs_by_request_id(
    instance_id: u64,
    request_id: *const u8,
    request_id_len: usize,
) -> AuthzStringArray {
    guard("authz_get_logs_by_request_id", || {
        let request_id = match input_str(request_id, request_id_len, "request_id") {
            Ok(request_id) => request_id,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        query_logs(|runtime| {
            envelopes(runtime.get_logs_by_request_id(instance_id, request_id))
        })
    })
}

/// Live log entries produced by `request_id` that also carry `tag`.
///
/// # Safety
/// Both buffers must be null or valid for reads of their lengths.
#[no_mangle]
pub unsafe extern "C" fn authz_get_logs_by_request_id_and_tag(
    instance_id: u64,
    request_id: *const u8,
    request_id_len: usize,
    tag: *const u8,
    tag_len: usize,
) -> AuthzStringArray {
    guard("authz_get_logs_by_request_id_and_tag", || {
        let arguments = input_str(request_id, request_id_len, "request_id")
            .and_then(|request_id| Ok((request_id, input_str(tag, tag_len, "tag")?)));
        let (request_id, tag) = match arguments {
            Ok(arguments) => arguments,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        query_logs(|runtime| {
            envelopes(runtime.get_logs_by_request_id_and_tag(instance_id, request_id, tag))
        })
    })
}

/// One log entry as a JSON envelope. Unknown handles and ids are errors.
///
/// # Safety
/// `log_id` must be null or valid for reads of `log_id_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_get_log_by_id(
    instance_id: u64,
    log_id: *const u8,
    log_id_len: usize,
) -> AuthzResult {
    guard("authz_get_log_by_id", || {
        let log_id = match input_str(log_id, log_id_len, "log_id") {
            Ok(log_id) => log_id,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        match runtime_for(instance_id).and_then(|runtime| runtime.get_log_by_id(instance_id, log_id)) {
            Ok(entry) => AuthzResult::ok(entry.to_json_bytes()),
            Err(err) => from_error(&err),
        }
    })
}

/// Stop an instance from accepting requests; logs stay queryable.
#[no_mangle]
pub extern "C" fn authz_shutdown(instance_id: u64) -> AuthzStatus {
    guard("authz_shutdown", || {
        match runtime_for(instance_id).and_then(|runtime| runtime.shutdown(instance_id)) {
            Ok(()) => AuthzStatus::Ok,
            Err(err) => AuthzStatus::from(&err),
        }
    })
}

/// Release an instance. Unknown or already dropped handles are ignored.
#[no_mangle]
pub extern "C" fn authz_drop(instance_id: u64) -> AuthzStatus {
    guard("authz_drop", || {
        if let Some(runtime) = lifecycle::runtime() {
            runtime.drop_instance(instance_id);
        }
        AuthzStatus::Ok
    })
}

/// Request counters of an instance as JSON.
#[no_mangle]
pub extern "C" fn authz_get_stats(instance_id: u64) -> AuthzResult {
    guard("authz_get_stats", || {
        json_result(runtime_for(instance_id).and_then(|runtime| runtime.stats(instance_id)))
    })
}

/// Shared body of the data entry points taking a key
unsafe fn with_key<T: Serialize>(
    entry_point: &str,
    instance_id: u64,
    key: *const u8,
    key_len: usize,
    op: impl FnOnce(&Runtime, &str) -> Result<T, AuthzError>,
) -> AuthzResult {
    guard(entry_point, || {
        let key = match input_str(key, key_len, "key") {
            Ok(key) => key,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        json_result(runtime_for(instance_id).and_then(|runtime| op(&runtime, key)))
    })
}

/// Store a JSON value under `key` in the instance's context data.
/// A `ttl_ms` of 0 applies the configured default TTL.
///
/// # Safety
/// Both buffers must be null or valid for reads of their lengths.
#[no_mangle]
pub unsafe extern "C" fn authz_push_data(
    instance_id: u64,
    key: *const u8,
    key_len: usize,
    value: *const u8,
    value_len: usize,
    ttl_ms: u64,
) -> AuthzStatus {
    guard("authz_push_data", || {
        let arguments = input_str(key, key_len, "key")
            .and_then(|key| Ok((key, input(value, value_len, "value")?)));
        let (key, value) = match arguments {
            Ok(arguments) => arguments,
            Err(message) => return fail(AuthzStatus::InvalidArgument, &message),
        };
        let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms));
        match runtime_for(instance_id).and_then(|runtime| runtime.push_data(instance_id, key, value, ttl)) {
            Ok(()) => AuthzStatus::Ok,
            Err(err) => AuthzStatus::from(&err),
        }
    })
}

/// Live value of `key` as JSON; `null` when absent or expired.
///
/// # Safety
/// `key` must be null or valid for reads of `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_get_data(instance_id: u64, key: *const u8, key_len: usize) -> AuthzResult {
    with_key("authz_get_data", instance_id, key, key_len, |runtime, key| {
        runtime.get_data(instance_id, key)
    })
}

/// Live entry of `key` with its metadata; `null` when absent or expired.
///
/// # Safety
/// `key` must be null or valid for reads of `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_get_data_entry(
    instance_id: u64,
    key: *const u8,
    key_len: usize,
) -> AuthzResult {
    with_key("authz_get_data_entry", instance_id, key, key_len, |runtime, key| {
        runtime.get_data_entry(instance_id, key)
    })
}

/// Remove `key`; `data` is `true` if a live entry was removed.
///
/// # Safety
/// `key` must be null or valid for reads of `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn authz_remove_data(
    instance_id: u64,
    key: *const u8,
    key_len: usize,
) -> AuthzResult {
    with_key("authz_remove_data", instance_id, key, key_len, |runtime, key| {
        runtime.remove_data(instance_id, key)
    })
}

/// Remove every context data entry of an instance.
#[no_mangle]
pub extern "C" fn authz_clear_data(instance_id: u64) -> AuthzStatus {
    guard("authz_clear_data", || {
        match runtime_for(instance_id).and_then(|runtime| runtime.clear_data(instance_id)) {
            Ok(()) => AuthzStatus::Ok,
            Err(err) => AuthzStatus::from(&err),
        }
    })
}

/// Every live context data entry as a JSON array, sorted by key.
#[no_mangle]
pub extern "C" fn authz_list_data(instance_id: u64) -> AuthzResult {
    guard("authz_list_data", || {
        json_result(runtime_for(instance_id).and_then(|runtime| runtime.list_data(instance_id)))
    })
}

/// Context data store counters as JSON.
#[no_mangle]
pub extern "C" fn authz_get_data_stats(instance_id: u64) -> AuthzResult {
    guard("authz_get_data_stats", || {
        json_result(runtime_for(instance_id).and_then(|runtime| runtime.data_stats(instance_id)))
    })
}

/// The calling thread's last error message; `data` is empty when there is
/// none. Reading does not clear it.
#[no_mangle]
pub extern "C" fn authz_get_last_error() -> AuthzResult {
    guard("authz_get_last_error", || {
        AuthzResult::ok(error_channel::get().map(String::into_bytes).unwrap_or_default())
    })
}

/// Clear the calling thread's last error.
#[no_mangle]
pub extern "C" fn authz_clear_last_error() {
    error_channel::clear();
}
