//! Stage hand-off primitives.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Single-slot hand-off where a new item replaces any pending one.
///
/// The consumer only ever sees the most recent item; older pending items are
/// discarded, never queued. Closing wakes the consumer, which still receives
/// a pending item before observing the close.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    item: Option<T>,
    closed: bool,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                item: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `item`, returning the pending item it displaced.
    ///
    /// Items published after [`close`](Self::close) are dropped.
    pub fn publish(&self, item: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let displaced = state.item.replace(item);
        drop(state);
        self.ready.notify_one();
        displaced
    }

    /// Block until an item is available. Returns `None` once the slot is
    /// closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.item.take() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Take the pending item without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.state.lock().item.take()
    }

    /// Whether an item is waiting to be taken.
    pub fn is_pending(&self) -> bool {
        self.state.lock().item.is_some()
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Closes the slot when dropped, so a consumer is released even if the
/// producer unwinds.
pub struct CloseOnDrop<T>(pub Arc<LatestSlot<T>>);

impl<T> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Admits every `stride`-th frame by a monotonically increasing counter.
#[derive(Debug, Clone)]
pub struct FrameGate {
    counter: u64,
    stride: u64,
}

impl FrameGate {
    /// A stride of zero is treated as one (admit everything).
    pub fn new(stride: u32) -> Self {
        Self {
            counter: 0,
            stride: u64::from(stride.max(1)),
        }
    }

    /// Count one frame and report whether it should be processed.
    pub fn admit(&mut self) -> bool {
        self.counter = self.counter.wrapping_add(1);
        self.counter % self.stride == 0
    }

    pub fn frames_seen(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_slot_keeps_newest_of_three() {
        let slot = Arc::new(LatestSlot::new());
        assert_eq!(slot.publish(1), None);
        assert_eq!(slot.publish(2), Some(1));
        assert_eq!(slot.publish(3), Some(2));
        slot.close();

        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = slot.take() {
                    seen.push(v);
                }
                seen
            })
        };
        assert_eq!(consumer.join().unwrap(), vec![3]);
    }

    #[test]
    fn test_slot_take_blocks_until_publish() {
        let slot = Arc::new(LatestSlot::new());
        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.take())
        };
        thread::sleep(Duration::from_millis(20));
        slot.publish("fresh");
        assert_eq!(consumer.join().unwrap(), Some("fresh"));
    }

    #[test]
    fn test_slot_close_releases_waiting_consumer() {
        let slot: Arc<LatestSlot<u32>> = Arc::new(LatestSlot::new());
        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.take())
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_slot_publish_after_close_is_dropped() {
        let slot = LatestSlot::new();
        slot.close();
        assert_eq!(slot.publish(5), None);
        assert_eq!(slot.try_take(), None);
        assert!(slot.is_closed());
    }

    #[test]
    fn test_slot_is_pending_until_taken() {
        let slot = LatestSlot::new();
        assert!(!slot.is_pending());
        slot.publish(7);
        assert!(slot.is_pending());
        assert_eq!(slot.try_take(), Some(7));
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_close_on_drop() {
        let slot: Arc<LatestSlot<u8>> = Arc::new(LatestSlot::new());
        drop(CloseOnDrop(Arc::clone(&slot)));
        assert!(slot.is_closed());
    }

    #[test]
    fn test_gate_admits_every_second_frame() {
        let mut gate = FrameGate::new(2);
        let admitted: Vec<bool> = (0..10).map(|_| gate.admit()).collect();
        assert_eq!(
            admitted,
            vec![false, true, false, true, false, true, false, true, false, true]
        );
        assert_eq!(gate.frames_seen(), 10);
    }

    #[test]
    fn test_gate_zero_stride_admits_all() {
        let mut gate = FrameGate::new(0);
        assert!((0..5).all(|_| gate.admit()));
    }

    proptest! {
        #[test]
        fn prop_gate_admits_one_per_stride(stride in 1u32..16, frames in 0u64..500) {
            let mut gate = FrameGate::new(stride);
            let admitted = (0..frames).filter(|_| gate.admit()).count() as u64;
            prop_assert_eq!(admitted, frames / u64::from(stride));
        }

        #[test]
        fn prop_slot_yields_last_published(
            values in proptest::collection::vec(any::<u32>(), 1..20)
        ) {
            let slot = LatestSlot::new();
            for v in &values {
                slot.publish(*v);
            }
            prop_assert_eq!(slot.try_take(), values.last().copied());
            prop_assert_eq!(slot.try_take(), None);
        }
    }
}
