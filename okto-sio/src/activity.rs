//! Disk activity bridge: one event source, two consumption adapters.
//!
//! Push: an injected sink invoked synchronously at the moment of the event.
//! Pull: the last event cached with a decay counter, decremented once per
//! frame tick, so a one-shot event stays visible to a polling UI for a
//! few frames.

/// Disk operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskOp {
    Read,
    Write,
}

/// Push consumer. Implementations must be non-blocking and must not
/// re-enter the bus layer; they run on the emulation thread.
pub trait ActivitySink {
    fn on_activity(&mut self, drive: u8, op: DiskOp);
}

/// Closures work as sinks
impl<F: FnMut(u8, DiskOp)> ActivitySink for F {
    fn on_activity(&mut self, drive: u8, op: DiskOp) {
        self(drive, op)
    }
}

/// Default sink: does nothing
struct NullSink;

impl ActivitySink for NullSink {
    fn on_activity(&mut self, _drive: u8, _op: DiskOp) {}
}

/// Frames an event stays visible to the poll interface
pub const ACTIVITY_DECAY_FRAMES: u32 = 8;

#[derive(Debug, Clone, Copy)]
struct CachedEvent {
    drive: u8,
    op: DiskOp,
    remaining: u32,
}

/// The bridge itself. Owned by the serving path; UI threads consume through
/// the facade's snapshot methods rather than touching this directly.
pub struct ActivityBridge {
    sink: Box<dyn ActivitySink + Send>,
    last: Option<CachedEvent>,
}

impl ActivityBridge {
    pub fn new() -> Self {
        ActivityBridge {
            sink: Box::new(NullSink),
            last: None,
        }
    }

    /// Replace the push sink; `None` restores the no-op default
    pub fn set_sink(&mut self, sink: Option<Box<dyn ActivitySink + Send>>) {
        self.sink = sink.unwrap_or_else(|| Box::new(NullSink));
    }

    /// Record one event: the sink fires immediately (no coalescing) and the
    /// poll cache is overwritten (last-write-wins)
    pub fn record(&mut self, drive: u8, op: DiskOp) {
        self.sink.on_activity(drive, op);
        self.last = Some(CachedEvent {
            drive,
            op,
            remaining: ACTIVITY_DECAY_FRAMES,
        });
    }

    /// Decay the poll cache; called once per emulated frame
    pub fn frame_tick(&mut self) {
        if let Some(event) = &mut self.last {
            event.remaining -= 1;
            if event.remaining == 0 {
                self.last = None;
            }
        }
    }

    /// Pull interface: `(drive, op, frames remaining)` while an event is
    /// still visible
    pub fn poll(&self) -> Option<(u8, DiskOp, u32)> {
        self.last.map(|e| (e.drive, e.op, e.remaining))
    }
}

impl Default for ActivityBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_push_fires_once_per_event() {
        let seen: Arc<Mutex<Vec<(u8, DiskOp)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();

        let mut bridge = ActivityBridge::new();
        bridge.set_sink(Some(Box::new(move |drive, op| {
            sink_seen.lock().unwrap().push((drive, op));
        })));

        bridge.record(2, DiskOp::Read);
        assert_eq!(*seen.lock().unwrap(), vec![(2, DiskOp::Read)]);
    }

    #[test]
    fn test_poll_decays_to_none() {
        let mut bridge = ActivityBridge::new();
        bridge.record(2, DiskOp::Read);

        let (drive, op, remaining) = bridge.poll().unwrap();
        assert_eq!((drive, op), (2, DiskOp::Read));
        assert!(remaining > 0);

        for _ in 0..ACTIVITY_DECAY_FRAMES {
            assert!(bridge.poll().is_some());
            bridge.frame_tick();
        }
        assert_eq!(bridge.poll(), None);

        // Further ticks stay at "no activity", never negative
        bridge.frame_tick();
        assert_eq!(bridge.poll(), None);
    }

    #[test]
    fn test_read_then_write_last_write_wins_poll_both_pushed() {
        let seen: Arc<Mutex<Vec<(u8, DiskOp)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();

        let mut bridge = ActivityBridge::new();
        bridge.set_sink(Some(Box::new(move |drive, op| {
            sink_seen.lock().unwrap().push((drive, op));
        })));

        bridge.record(5, DiskOp::Read);
        bridge.record(5, DiskOp::Write);

        // Push path saw both, in order
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(5, DiskOp::Read), (5, DiskOp::Write)]
        );
        // Poll cache holds only the write
        let (drive, op, _) = bridge.poll().unwrap();
        assert_eq!((drive, op), (5, DiskOp::Write));
    }

    #[test]
    fn test_sink_replaceable_and_unsettable() {
        let mut bridge = ActivityBridge::new();
        // No sink set: still records for the poll path
        bridge.record(1, DiskOp::Write);
        assert!(bridge.poll().is_some());

        let seen: Arc<Mutex<Vec<(u8, DiskOp)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        bridge.set_sink(Some(Box::new(move |drive, op| {
            sink_seen.lock().unwrap().push((drive, op));
        })));
        bridge.record(1, DiskOp::Read);
        assert_eq!(seen.lock().unwrap().len(), 1);

        bridge.set_sink(None);
        bridge.record(1, DiskOp::Read);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
