//! Caller-owned output records
//!
//! Every buffer handed across the boundary is a boxed slice leaked into a
//! `ptr`/`len` pair. The matching release function rebuilds the box, drops
//! it and zeroes the record, so releasing twice or releasing a zeroed
//! record does nothing.

use std::ptr;

use crate::AuthzStatus;

/// Byte buffer allocated by the runtime. May contain NUL bytes.
#[repr(C)]
#[derive(Debug)]
pub struct AuthzBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

impl AuthzBytes {
    pub const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Self { ptr, len }
    }

    pub(crate) fn from_message(message: &str) -> Self {
        Self::from_vec(message.as_bytes().to_vec())
    }

    /// View the buffer. Zeroed buffers read as empty.
    ///
    /// # Safety
    /// The buffer must have been produced by this library and not yet
    /// released.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.ptr, self.len)
        }
    }

    /// # Safety
    /// Same as [`AuthzBytes::as_slice`].
    pub(crate) unsafe fn release(&mut self) {
        if !self.ptr.is_null() {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.len)));
        }
        *self = Self::empty();
    }
}

/// Result carrying a byte payload
#[repr(C)]
#[derive(Debug)]
pub struct AuthzResult {
    pub status: AuthzStatus,
    pub data: AuthzBytes,
    pub error: AuthzBytes,
}

impl AuthzResult {
    pub(crate) fn ok(data: Vec<u8>) -> Self {
        Self {
            status: AuthzStatus::Ok,
            data: AuthzBytes::from_vec(data),
            error: AuthzBytes::empty(),
        }
    }

    pub(crate) fn failure(status: AuthzStatus, message: &str) -> Self {
        Self {
            status,
            data: AuthzBytes::empty(),
            error: AuthzBytes::from_message(message),
        }
    }

    fn zeroed() -> Self {
        Self {
            status: AuthzStatus::Ok,
            data: AuthzBytes::empty(),
            error: AuthzBytes::empty(),
        }
    }
}

/// Result of instance creation
#[repr(C)]
#[derive(Debug)]
pub struct AuthzInstanceResult {
    pub status: AuthzStatus,
    /// 0 on failure
    pub instance_id: u64,
    pub error: AuthzBytes,
}

impl AuthzInstanceResult {
    pub(crate) fn ok(instance_id: u64) -> Self {
        Self {
            status: AuthzStatus::Ok,
            instance_id,
            error: AuthzBytes::empty(),
        }
    }

    pub(crate) fn failure(status: AuthzStatus, message: &str) -> Self {
        Self {
            status,
            instance_id: 0,
            error: AuthzBytes::from_message(message),
        }
    }

    fn zeroed() -> Self {
        Self {
            status: AuthzStatus::Ok,
            instance_id: 0,
            error: AuthzBytes::empty(),
        }
    }
}

/// Array of byte buffers (log ids or log entry envelopes)
#[repr(C)]
#[derive(Debug)]
pub struct AuthzStringArray {
    pub status: AuthzStatus,
    pub items: *mut AuthzBytes,
    pub count: usize,
}

impl AuthzStringArray {
    pub(crate) fn ok(items: Vec<Vec<u8>>) -> Self {
        if items.is_empty() {
            return Self::zeroed();
        }
        let items: Box<[AuthzBytes]> = items.into_iter().map(AuthzBytes::from_vec).collect();
        let count = items.len();
        Self {
            status: AuthzStatus::Ok,
            items: Box::into_raw(items) as *mut AuthzBytes,
            count,
        }
    }

    pub(crate) fn failure(status: AuthzStatus) -> Self {
        Self {
            status,
            items: ptr::null_mut(),
            count: 0,
        }
    }

    fn zeroed() -> Self {
        Self::failure(AuthzStatus::Ok)
    }

    /// View the items. Zeroed arrays read as empty.
    ///
    /// # Safety
    /// The array must have been produced by this library and not yet
    /// released.
    pub unsafe fn as_slice(&self) -> &[AuthzBytes] {
        if self.items.is_null() || self.count == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.items, self.count)
        }
    }
}

/// Release an [`AuthzResult`] and zero it.
///
/// # Safety
/// `result` must be null or point to a result returned by this library.
#[no_mangle]
pub unsafe extern "C" fn authz_result_free(result: *mut AuthzResult) {
    if let Some(result) = result.as_mut() {
        result.data.release();
        result.error.release();
        *result = AuthzResult::zeroed();
    }
}

/// Release an [`AuthzInstanceResult`] and zero it.
///
/// # Safety
/// `result` must be null or point to a result returned by this library.
#[no_mangle]
pub unsafe extern "C" fn authz_instance_result_free(result: *mut AuthzInstanceResult) {
    if let Some(result) = result.as_mut() {
        result.error.release();
        *result = AuthzInstanceResult::zeroed();
    }
}

/// Release an [`AuthzStringArray`] and every item in it, then zero it.
///
/// # Safety
/// `array` must be null or point to an array returned by this library.
#[no_mangle]
pub unsafe extern "C" fn authz_string_array_free(array: *mut AuthzStringArray) {
    if let Some(array) = array.as_mut() {
        if !array.items.is_null() {
            let mut items = Box::from_raw(ptr::slice_from_raw_parts_mut(array.items, array.count));
            for item in items.iter_mut() {
                item.release();
            }
            drop(items);
        }
        *array = AuthzStringArray::zeroed();
    }
}
