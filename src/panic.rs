use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::error::BoxError;

/// PanicError is the error a branch returns in place of a panic.
///
/// [crate::switch()] and [crate::experiment] never let a panic in a branch escape; it is caught
/// and converted into this error instead.
///
/// If the branch panicked with a [BoxError] payload (see [std::panic::panic_any]), that error is
/// available through [StdError::source] and [PanicError::error]. Any other payload is kept and
/// can be taken out once with [PanicError::take_payload].
pub struct PanicError {
    message: String,
    source: Option<BoxError>,
    payload: Mutex<Option<Box<dyn Any + Send>>>,
}

impl PanicError {
    /// Wraps a panic payload as returned by [std::panic::catch_unwind].
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<BoxError>() {
            Ok(err) => PanicError {
                message: err.to_string(),
                source: Some(*err),
                payload: Mutex::new(None),
            },
            Err(payload) => PanicError {
                message: panic_message(payload.as_ref()),
                source: None,
                payload: Mutex::new(Some(payload)),
            },
        }
    }

    /// Returns the panic message, or the error's message if the payload was an error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the error the branch panicked with, if the payload was a [BoxError].
    pub fn error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Takes the original panic payload. Returns None if the payload was an error or has already
    /// been taken.
    pub fn take_payload(&self) -> Option<Box<dyn Any + Send>> {
        self.payload.lock().take()
    }
}

impl fmt::Debug for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicError")
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recovered panic: {}", self.message)
    }
}

impl StdError for PanicError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// Runs `f`, turning a panic into a [PanicError].
pub(crate) fn recover<T, F>(f: F) -> Result<T, PanicError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(PanicError::new)
}
