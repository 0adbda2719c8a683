//! Per-thread last-error slot
//!
//! Every native thread calling into the runtime gets its own slot, allocated
//! lazily on first use and released when the thread exits. A failure on one
//! thread never overwrites the message another thread is about to read.

use std::cell::RefCell;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Overwrite the calling thread's last error
pub fn set(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Read the calling thread's last error without clearing it
pub fn get() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Empty the calling thread's slot
pub fn clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Record `err` in the calling thread's slot and hand the result back.
pub(crate) fn report<T, E: std::fmt::Display>(result: Result<T, E>) -> Result<T, E> {
    if let Err(err) = &result {
        set(err.to_string());
    }
    result
}
