//! Pluggable seams of the send path: serializer, scrubber, error hook

use std::fmt;
use std::sync::Arc;

use crate::error::CaptureError;
use crate::event::Event;

/// Turns an event into the request body
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &Event) -> Result<Vec<u8>, CaptureError>;
}

/// Default serializer: compact JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl EventSerializer for JsonSerializer {
    fn serialize(&self, event: &Event) -> Result<Vec<u8>, CaptureError> {
        Ok(serde_json::to_vec(event)?)
    }
}

/// Redacts sensitive content from the serialized payload before it leaves
/// the process
pub trait LogScrubber: Send + Sync {
    fn scrub(&self, payload: String) -> String;
}

impl<F> LogScrubber for F
where
    F: Fn(String) -> String + Send + Sync,
{
    fn scrub(&self, payload: String) -> String {
        self(payload)
    }
}

/// Called with every absorbed capture failure
#[derive(Clone)]
pub struct ErrorOnCapture(Arc<dyn Fn(&CaptureError) + Send + Sync>);

impl ErrorOnCapture {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&CaptureError) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub fn notify(&self, error: &CaptureError) {
        (self.0)(error)
    }
}

impl fmt::Debug for ErrorOnCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorOnCapture(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_scrubber() {
        let scrubber = |payload: String| payload.replace("hunter2", "********");
        assert_eq!(scrubber.scrub("pw=hunter2".to_string()), "pw=********");
    }

    #[test]
    fn test_error_hook_receives_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = ErrorOnCapture::new(move |e| sink.lock().unwrap().push(e.to_string()));

        hook.notify(&CaptureError::NoRuntime);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("runtime"));
    }
}
