//! Lifecycle hooks for deferred-string resolution.
//!
//! Resolution emits events when a request is about to be sent, when an
//! interpolated value fails, when a stream opens, and when the request
//! settles. Implement [`EventHandler`] to observe them; nothing depends on a
//! handler being installed.

use std::sync::Arc;

/// Events emitted while a [`GptString`](crate::GptString) resolves.
#[derive(Debug, Clone)]
pub enum Event {
    /// The prompt is assembled and the request is about to be sent.
    RequestStart {
        /// The tag's `id`, or the model name when unset.
        label: String,
        /// Model being requested.
        model: String,
        /// The user message after interpolation.
        prompt: String,
    },
    /// An interpolated value failed; its error text was used instead.
    InterpolationFailed {
        label: String,
        /// Position of the value in the template.
        index: usize,
        message: String,
    },
    /// A streaming response was accepted and is being fanned out.
    StreamOpened { label: String },
    /// The request has settled.
    RequestEnd {
        label: String,
        /// Whether resolution succeeded.
        ok: bool,
        /// Number of choices received (0 on failure or for streams).
        choices: usize,
    },
}

/// Handler for resolution lifecycle events.
///
/// # Example
///
/// ```
/// use gpt_tag::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::RequestStart { label, model, .. } => println!("[start] {} ({})", label, model),
///             Event::RequestEnd { label, ok, .. } => println!("[end] {} ok={}", label, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
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
/// ```
/// use gpt_tag::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::InterpolationFailed { message, .. } = event {
///         eprintln!("prompt value failed: {}", message);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
