//! Outbound data ring between the capture thread and the control loop.
//!
//! The capture thread pushes frames through a [`FrameSink`]; the control loop
//! drains them onto the out-fd in FIFO order. The ring is budgeted by payload
//! bytes. A full ring makes `send_data` report [`SendStatus::BufferFull`] and
//! the producer is expected to park in [`FrameSink::wait_space`] until the
//! drain side makes room. Error frames bypass the budget so a wedged ring can
//! still report why it is going down.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::messages::{ControlReply, Severity};

/// Default ring budget: enough for a few hundred full-size 802.11 frames.
pub const DEFAULT_RING_BYTES: usize = 4 * 1024 * 1024;

/// Outcome of a single `send_data` attempt.
///
/// Maps the framework contract of positive / zero / negative send results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    BufferFull,
    Shutdown,
}

#[derive(Default)]
struct RingState {
    queue: VecDeque<ControlReply>,
    queued_bytes: usize,
    shutdown: bool,
    spindown: bool,
}

pub struct DataRing {
    state: Mutex<RingState>,
    space: Condvar,
    capacity_bytes: usize,
}

impl DataRing {
    pub fn new(capacity_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RingState::default()),
            space: Condvar::new(),
            capacity_bytes: capacity_bytes.max(1),
        })
    }

    pub fn sink(self: &Arc<Self>) -> FrameSink {
        FrameSink {
            ring: Arc::clone(self),
        }
    }

    /// Pop everything queued, in arrival order, and wake parked producers.
    pub fn drain(&self) -> Vec<ControlReply> {
        let mut state = self.state.lock().unwrap();
        let drained: Vec<ControlReply> = state.queue.drain(..).collect();
        state.queued_bytes = 0;
        drop(state);
        if !drained.is_empty() {
            self.space.notify_all();
        }
        drained
    }

    /// Mark the ring dead. Producers see `Shutdown` from then on and any
    /// parked producer is released.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        drop(state);
        self.space.notify_all();
    }

    pub fn spindown_requested(&self) -> bool {
        self.state.lock().unwrap().spindown
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }
}

/// Capture-thread handle onto the ring.
#[derive(Clone)]
pub struct FrameSink {
    ring: Arc<DataRing>,
}

impl FrameSink {
    /// Queue one captured frame. Never blocks.
    pub fn send_data(&self, ts_sec: i64, ts_usec: i64, dlt: i32, packet: &[u8]) -> SendStatus {
        let mut state = self.ring.state.lock().unwrap();
        if state.shutdown {
            return SendStatus::Shutdown;
        }
        if state.queued_bytes + packet.len() > self.ring.capacity_bytes {
            return SendStatus::BufferFull;
        }
        state.queued_bytes += packet.len();
        state.queue.push_back(ControlReply::Data {
            ts_sec,
            ts_usec,
            dlt,
            packet: packet.to_vec(),
        });
        SendStatus::Sent
    }

    /// Park until the control loop drains the ring (or shuts it down).
    ///
    /// Only meaningful right after a `BufferFull`; the drain side empties
    /// the ring wholesale, so an empty queue means there is room again.
    pub fn wait_space(&self) {
        let mut state = self.ring.state.lock().unwrap();
        while !state.shutdown && !state.queue.is_empty() {
            state = self.ring.space.wait(state).unwrap();
        }
    }

    /// Queue a fatal error report; exempt from the byte budget.
    pub fn send_error(&self, text: impl Into<String>) {
        let mut state = self.ring.state.lock().unwrap();
        state.queue.push_back(ControlReply::Error { text: text.into() });
    }

    /// Queue an informational message; exempt from the byte budget.
    pub fn send_message(&self, severity: Severity, text: impl Into<String>) {
        let mut state = self.ring.state.lock().unwrap();
        state.queue.push_back(ControlReply::Message {
            severity,
            text: text.into(),
        });
    }

    /// Ask the control loop to wind the whole helper down.
    pub fn trigger_spindown(&self) {
        let mut state = self.ring.state.lock().unwrap();
        state.spindown = true;
    }

    pub fn is_shutdown(&self) -> bool {
        self.ring.state.lock().unwrap().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_drain_in_fifo_order() {
        let ring = DataRing::new(1024);
        let sink = ring.sink();

        assert_eq!(sink.send_data(1, 0, 127, b"aa"), SendStatus::Sent);
        assert_eq!(sink.send_data(2, 0, 127, b"bb"), SendStatus::Sent);

        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        match (&drained[0], &drained[1]) {
            (
                ControlReply::Data { ts_sec: 1, .. },
                ControlReply::Data { ts_sec: 2, .. },
            ) => {}
            other => panic!("unexpected drain order: {other:?}"),
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_reports_buffer_full() {
        let ring = DataRing::new(4);
        let sink = ring.sink();

        assert_eq!(sink.send_data(0, 0, 127, b"1234"), SendStatus::Sent);
        assert_eq!(sink.send_data(0, 0, 127, b"5"), SendStatus::BufferFull);

        ring.drain();
        assert_eq!(sink.send_data(0, 0, 127, b"5"), SendStatus::Sent);
    }

    #[test]
    fn shutdown_beats_everything() {
        let ring = DataRing::new(4);
        let sink = ring.sink();
        ring.shutdown();
        assert_eq!(sink.send_data(0, 0, 127, b"x"), SendStatus::Shutdown);
    }

    #[test]
    fn parked_producer_wakes_on_drain() {
        let ring = DataRing::new(4);
        let sink = ring.sink();
        assert_eq!(sink.send_data(0, 0, 127, b"1234"), SendStatus::Sent);

        let parked = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                sink.wait_space();
                sink.send_data(1, 0, 127, b"ok")
            })
        };

        // Give the producer a moment to park, then make room.
        std::thread::sleep(std::time::Duration::from_millis(20));
        ring.drain();

        assert_eq!(parked.join().unwrap(), SendStatus::Sent);
    }

    #[test]
    fn errors_ignore_the_byte_budget() {
        let ring = DataRing::new(1);
        let sink = ring.sink();
        assert_eq!(sink.send_data(0, 0, 127, b"zz"), SendStatus::BufferFull);
        sink.send_error("capture fell over");
        let drained = ring.drain();
        assert!(matches!(drained[0], ControlReply::Error { .. }));
    }
}
