//! Callback that discards every event.

use crate::callback::{CallbackEvent, CallbackPlugin};

/// No output at all, for scripting and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallback;

impl NullCallback {
    pub fn new() -> Self {
        Self
    }
}

impl CallbackPlugin for NullCallback {
    fn name(&self) -> &str {
        "null"
    }

    #[inline]
    fn on_event(&self, _event: &CallbackEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_callback_ignores_events() {
        let callback = NullCallback::new();
        callback.on_event(&CallbackEvent::TaskStart { name: "x".into() });
        assert_eq!(callback.name(), "null");
    }
}
