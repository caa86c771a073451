//! Process wide channel for errors that cannot be returned to a caller.
//!
//! Errors discovered inside `Drop` implementations, and every error when the
//! `recoverable-errors` feature is disabled, end up here. Registered callbacks are invoked in
//! registration order, after which the process is aborted. The abort cannot be removed.
//!
//! Registering a callback may happen concurrently with reporting. Callbacks must not register
//! further callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use lazy_static::lazy_static;

use super::Error;

type IrrecoverableCallback = Box<dyn Fn(&Error) + Send + Sync>;

lazy_static! {
    static ref CALLBACKS: RwLock<Vec<IrrecoverableCallback>> = RwLock::new(Vec::new());
}

/// Appends a callback that is invoked for every irrecoverable error.
pub fn register_irrecoverable_callback<F>(callback: F) where F: Fn(&Error) + Send + Sync + 'static {
    let mut callbacks = CALLBACKS.write().unwrap_or_else(|err| err.into_inner());
    callbacks.push(Box::new(callback));
}

/// Removes every user registered callback. Only intended for teardown.
pub fn clear_irrecoverable_callbacks() {
    let mut callbacks = CALLBACKS.write().unwrap_or_else(|err| err.into_inner());
    callbacks.clear();
}

/// Invokes every registered callback with the error without terminating the process.
///
/// A panicking callback is logged and does not prevent later callbacks from running.
pub fn report_irrecoverable(error: &Error) {
    let callbacks = CALLBACKS.read().unwrap_or_else(|err| err.into_inner());
    for (index, callback) in callbacks.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
            log::error!("Irrecoverable error callback #{} panicked", index);
        }
    }
}

/// Reports the error to all registered callbacks and aborts the process.
pub fn irrecoverable_error(error: Error) -> ! {
    report_irrecoverable(&error);
    log::error!("Irrecoverable error: {}", error);
    std::process::abort()
}

/// Routes a failed destruction to the channel. Used by `Drop` implementations which cannot
/// return errors.
pub(crate) fn destroy_failed(what: &str, error: Error) -> ! {
    log::error!("Failed to destroy {}", what);
    irrecoverable_error(error)
}
