//! Score subscribers.

use framewise_core::CompositionScore;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`Pipeline::subscribe`](crate::Pipeline::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

type Handler = Arc<dyn Fn(CompositionScore) + Send + Sync>;

/// Registered handlers, in subscription order.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
}

impl Subscribers {
    pub fn add(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers.write().push((id, handler));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Invoke every handler with `score`. Handlers run against a snapshot so
    /// they may subscribe or unsubscribe without deadlocking. A panicking
    /// handler is logged and does not affect the others.
    pub fn dispatch(&self, score: CompositionScore) {
        let snapshot: Vec<(SubscriptionId, Handler)> = self.handlers.read().clone();
        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(score))).is_err() {
                tracing::error!(subscription = id.get(), "score handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewise_core::{CompositionScorer, FeatureVector};
    use parking_lot::Mutex;

    fn score() -> CompositionScore {
        CompositionScorer::heuristic().score(&FeatureVector::uniform(0.5))
    }

    #[test]
    fn test_dispatch_in_subscription_order() {
        let subs = Subscribers::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let log = Arc::clone(&log);
            subs.add(Arc::new(move |_| log.lock().push(tag)));
        }
        subs.dispatch(score());
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let subs = Subscribers::default();
        let hits = Arc::new(AtomicU64::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            subs.add(Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        subs.dispatch(score());
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        subs.dispatch(score());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let subs = Subscribers::default();
        let hits = Arc::new(AtomicU64::new(0));
        subs.add(Arc::new(|_| panic!("bad handler")));
        {
            let hits = Arc::clone(&hits);
            subs.add(Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        subs.dispatch(score());
        subs.dispatch(score());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let subs = Subscribers::default();
        let a = subs.add(Arc::new(|_| {}));
        let b = subs.add(Arc::new(|_| {}));
        assert_ne!(a, b);
    }
}
