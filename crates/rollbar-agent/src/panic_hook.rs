//! Uncaught-panic reporting.
//!
//! When `capture_uncaught_exceptions` is set, the first such notifier
//! installs a process-wide panic hook that reports the panic at critical
//! level through the normal submission path and then delegates to the
//! previously installed hook. The hook holds only a weak reference, so a
//! disposed notifier never keeps reporting.

use std::any::Any;
use std::panic;
use std::sync::{Arc, Once, Weak};

use rollbar_api::{Body, Level};
use serde_json::{Map, Value};

use crate::notifier::{Notifier, ReportOptions};

static INSTALLED: Once = Once::new();

/// Installs the process-wide panic hook, once. Later calls are no-ops; the
/// first capturing notifier owns panic reporting for the process.
pub(crate) fn install(notifier: &Arc<Notifier>) {
    let weak = Arc::downgrade(notifier);
    INSTALLED.call_once(move || {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            report_panic(&weak, info);
            previous(info);
        }));
    });
}

fn report_panic(weak: &Weak<Notifier>, info: &panic::PanicHookInfo<'_>) {
    let Some(notifier) = weak.upgrade() else {
        return;
    };

    let mut extra = Map::new();
    if let Some(location) = info.location() {
        extra.insert(
            "location".to_string(),
            Value::String(format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            )),
        );
    }

    // Submission is fire-and-forget; a failure here must never panic again.
    let _ = notifier.log_with(
        Level::Critical,
        Body::message_with(describe(info.payload()), extra),
        ReportOptions::default(),
    );
}

/// Best-effort extraction of the panic message.
fn describe(payload: &dyn Any) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_str_payload() {
        let payload: Box<dyn Any> = Box::new("boom");
        assert_eq!(describe(payload.as_ref()), "boom");
    }

    #[test]
    fn test_describe_string_payload() {
        let payload: Box<dyn Any> = Box::new("formatted boom".to_string());
        assert_eq!(describe(payload.as_ref()), "formatted boom");
    }

    #[test]
    fn test_describe_opaque_payload() {
        let payload: Box<dyn Any> = Box::new(42u32);
        assert_eq!(describe(payload.as_ref()), "panic with non-string payload");
    }
}
