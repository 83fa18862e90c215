//! Small helpers shared by the task and timeout registries.

use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
#[must_use]
pub fn epoch_millis() -> u128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis(),
        Err(_) => 0,
    }
}

/// Text of a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
