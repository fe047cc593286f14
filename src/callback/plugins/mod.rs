//! Built-in callback plugins.

pub mod default;
pub mod null;

pub use default::DefaultCallback;
pub use null::NullCallback;

use std::sync::Arc;

use super::CallbackPlugin;

/// Look up a built-in plugin by name
pub fn by_name(name: &str, verbosity: u8) -> Option<Arc<dyn CallbackPlugin>> {
    match name {
        "default" => Some(Arc::new(DefaultCallback::new(verbosity))),
        "null" => Some(Arc::new(NullCallback)),
        _ => None,
    }
}
