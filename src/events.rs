//! Engine Events
//!
//! A small publish/subscribe bus. Subscribers are closures keyed by a
//! [`Subscription`] handle, called in subscription order for every event
//! published after they subscribed.
//!
//! ```rust,ignore
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let sub = engine.events_mut().subscribe(move |e| sink.borrow_mut().push(e.clone()));
//! engine.render()?;
//! engine.events_mut().unsubscribe(sub);
//! ```

use slotmap::{SlotMap, new_key_type};

use crate::display::PickHit;
use crate::errors::ErrorReport;

new_key_type! {
    /// Handle returned by [`EventBus::subscribe`].
    pub struct Subscription;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A compile traversal is starting; state stacks are reset.
    SceneCompiling,
    /// The graphics context was lost; rendering is suspended.
    ContextLost,
    /// GPU state was rebuilt after a context loss.
    ContextRestored,
    /// Something below the listening node was drawn this frame.
    NodeRendered(String),
    NodePicked(PickHit),
    /// Nothing was under the cursor.
    NothingPicked { x: u32, y: u32 },
    /// A fatal error, also returned to the caller.
    Error(ErrorReport),
    TaskStarted { task: u64, description: String },
    TaskFinished { task: u64 },
    TaskFailed { task: u64, reason: String },
}

type Handler = Box<dyn FnMut(&EngineEvent)>;

#[derive(Default)]
pub struct EventBus {
    handlers: SlotMap<Subscription, Handler>,
    published: u64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&EngineEvent) + 'static) -> Subscription {
        self.handlers.insert(Box::new(handler))
    }

    /// Returns whether the subscription was live.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.handlers.remove(subscription).is_some()
    }

    pub fn publish(&mut self, event: &EngineEvent) {
        log::trace!("event: {event:?}");
        self.published += 1;
        for handler in self.handlers.values_mut() {
            handler(event);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Events published so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .field("published", &self.published)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn unsubscribed_handlers_stop_hearing() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = bus.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        bus.publish(&EngineEvent::SceneCompiling);
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.publish(&EngineEvent::ContextLost);

        assert_eq!(*seen.borrow(), vec![EngineEvent::SceneCompiling]);
        assert_eq!(bus.published(), 2);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
