//! Event system for recognition lifecycle hooks.
//!
//! The recognizer emits events when a call starts, when transport or
//! semantic retries happen, and when it finishes. Implement
//! [`EventHandler`] to observe them; [`TracingEventHandler`] forwards them
//! to the `tracing` subscriber and is what the server installs.

use std::sync::Arc;

/// Events emitted during recognition.
#[derive(Debug, Clone)]
pub enum Event {
    /// A recognition call has started.
    RecognitionStart {
        /// Name of the backend serving the call.
        backend: String,
        /// Model identifier.
        model: String,
    },
    /// A transport-level retry due to an HTTP or connection error.
    TransportRetry {
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// Delay before this retry attempt in milliseconds.
        delay_ms: u64,
        /// Reason for the retry (error description).
        reason: String,
    },
    /// A semantic retry attempt is starting.
    RetryStart {
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// Why the reply was rejected.
        reason: String,
    },
    /// A semantic retry sequence has completed.
    RetryEnd {
        /// Total number of retry attempts made.
        attempts: u32,
        /// Whether the final attempt succeeded.
        success: bool,
    },
    /// A recognition call has finished.
    RecognitionEnd {
        /// Whether recognition produced a usable reply.
        ok: bool,
        /// Number of recognized items.
        items: usize,
    },
}

/// Handler for recognition lifecycle events.
///
/// # Example
///
/// ```
/// use inkcalc::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::RecognitionEnd { ok, items } => println!("[end] ok={} items={}", ok, items),
///             Event::TransportRetry { attempt, .. } => println!("[retry] {}", attempt),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the recognizer emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use inkcalc::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::RetryStart { reason, .. } = event {
///         eprintln!("retrying: {}", reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Forwards events to `tracing`: retries at `warn`, the rest at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

impl EventHandler for TracingEventHandler {
    fn on_event(&self, event: Event) {
        match event {
            Event::RecognitionStart { backend, model } => {
                tracing::debug!(%backend, %model, "recognition started");
            }
            Event::TransportRetry {
                attempt,
                delay_ms,
                reason,
            } => {
                tracing::warn!(attempt, delay_ms, %reason, "retrying backend call");
            }
            Event::RetryStart { attempt, reason } => {
                tracing::warn!(attempt, %reason, "re-asking model after unusable reply");
            }
            Event::RetryEnd { attempts, success } => {
                tracing::debug!(attempts, success, "semantic retry finished");
            }
            Event::RecognitionEnd { ok, items } => {
                tracing::debug!(ok, items, "recognition finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_reaches_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> = Some(Arc::new(FnEventHandler(
            move |event: Event| sink.lock().unwrap().push(event),
        )));

        emit(&handler, Event::RetryEnd { attempts: 1, success: true });
        emit(&None, Event::RetryEnd { attempts: 2, success: false });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Event::RetryEnd { attempts: 1, success: true }));
    }

    #[test]
    fn test_tracing_handler_accepts_every_event() {
        let handler = TracingEventHandler;
        handler.on_event(Event::RecognitionStart {
            backend: "mock".into(),
            model: "m".into(),
        });
        handler.on_event(Event::TransportRetry {
            attempt: 1,
            delay_ms: 10,
            reason: "HTTP 503".into(),
        });
        handler.on_event(Event::RecognitionEnd { ok: true, items: 0 });
    }
}
