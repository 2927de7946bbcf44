//! The capture thread: a blocking pcap read loop with backpressure-aware
//! frame handoff.
//!
//! Channel control never happens here; the control thread owns it. All this
//! loop does is pull frames off the driver, push them into the ring, and
//! turn the pcap loop ending into an explained spindown.

use std::io;
use std::thread::JoinHandle;

use pcap::{Active, Capture};
use tracing::debug;
use wavecap_netlink::ifcontrol;
use wavecap_proto::{FrameSink, SendStatus};

/// Frame handoff surface, split from [`FrameSink`] so the retry loop can be
/// tested against a scripted fake.
trait Sink {
    fn send_data(&self, ts_sec: i64, ts_usec: i64, dlt: i32, packet: &[u8]) -> SendStatus;
    fn wait_space(&self);
    fn send_error(&self, text: String);
    fn trigger_spindown(&self);
    fn is_shutdown(&self) -> bool;
}

impl Sink for FrameSink {
    fn send_data(&self, ts_sec: i64, ts_usec: i64, dlt: i32, packet: &[u8]) -> SendStatus {
        FrameSink::send_data(self, ts_sec, ts_usec, dlt, packet)
    }

    fn wait_space(&self) {
        FrameSink::wait_space(self)
    }

    fn send_error(&self, text: String) {
        FrameSink::send_error(self, text)
    }

    fn trigger_spindown(&self) {
        FrameSink::trigger_spindown(self)
    }

    fn is_shutdown(&self) -> bool {
        FrameSink::is_shutdown(self)
    }
}

pub fn spawn(
    cap: Capture<Active>,
    cap_interface: String,
    dlt: i32,
    sink: FrameSink,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("wifi-capture".into())
        .spawn(move || run(cap, &cap_interface, dlt, &sink))
}

fn run(mut cap: Capture<Active>, cap_interface: &str, dlt: i32, sink: &FrameSink) {
    debug!(interface = cap_interface, dlt, "capture loop starting");

    let reason = loop {
        // The pcap handle has a 1 s read timeout, so a requested spindown is
        // noticed within one tick even on a silent channel.
        if sink.is_shutdown() {
            debug!(interface = cap_interface, "capture loop stopping on shutdown");
            return;
        }

        match cap.next_packet() {
            Ok(packet) => {
                let delivered = dispatch(
                    sink,
                    dlt,
                    packet.header.ts.tv_sec as i64,
                    packet.header.ts.tv_usec as i64,
                    packet.data,
                );
                if !delivered {
                    return;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => break e.to_string(),
        }
    };

    let if_up = ifcontrol::interface_flags(cap_interface)
        .ok()
        .map(|flags| flags & libc::IFF_UP as u32 != 0);
    for error in closure_errors(cap_interface, &reason, if_up) {
        sink.send_error(error);
    }
    sink.trigger_spindown();
    debug!(interface = cap_interface, "capture loop finished");
}

/// Hand one frame to the ring, parking while the outbound buffer is full.
/// Returns false when the ring is gone and the loop must terminate.
fn dispatch<S: Sink>(sink: &S, dlt: i32, ts_sec: i64, ts_usec: i64, data: &[u8]) -> bool {
    loop {
        match sink.send_data(ts_sec, ts_usec, dlt, data) {
            SendStatus::Sent => return true,
            SendStatus::BufferFull => sink.wait_space(),
            SendStatus::Shutdown => {
                sink.send_error("unable to send DATA frame".into());
                sink.trigger_spindown();
                return false;
            }
        }
    }
}

/// Error messages explaining why the capture loop ended. The interface-down
/// hint is attached when the flags show IFF_UP gone (or cannot be read).
fn closure_errors(cap_interface: &str, reason: &str, if_up: Option<bool>) -> Vec<String> {
    let reason = if reason.is_empty() {
        "interface closed"
    } else {
        reason
    };
    let mut errors = vec![format!("Interface '{cap_interface}' closed: {reason}")];
    if !if_up.unwrap_or(false) {
        errors.push(format!(
            "Interface '{cap_interface}' no longer appears to be up; this can happen \
             when it is unplugged, or another service like DHCP or NetworkManager has \
             taken over and shut it down on us."
        ));
    }
    errors
}
