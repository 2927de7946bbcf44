//! Host-side capture framework.
//!
//! [`CaptureHandler`] owns the fd pair and runs the control plane on the
//! calling thread: a poll(2) loop over the in-fd, the channel-hop deadline
//! and the outbound data ring. Every callback of the plugged-in
//! [`CaptureSource`] runs on this thread; the only other thread in a helper
//! is the capture thread the source spawns from `start_capture`, which talks
//! back exclusively through the [`FrameSink`].

use std::fs::File;
use std::os::fd::{AsFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, info, warn};

use crate::definition::SourceDefinition;
use crate::error::{ProtoError, Result};
use crate::messages::{
    decode_request, encode_reply, ControlReply, ControlRequest, DeviceEntry, Severity, TuneRequest,
};
use crate::ring::{DataRing, FrameSink, DEFAULT_RING_BYTES};
use crate::wire::{read_frame, write_frame};
use crate::{MAX_DATA_FRAME, MAX_FRAME};

/// How often the loop wakes to drain the ring when nothing else is due.
const DRAIN_TICK: Duration = Duration::from_millis(100);

/// Outcome of probing a source definition.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Definition is malformed or the probe itself failed.
    Error(String),
    /// Definition parsed but this helper cannot drive the device.
    Unsupported(String),
    Supported {
        channels: Vec<String>,
        chanset: Option<String>,
    },
}

/// Outcome of opening a source for capture.
#[derive(Debug)]
pub enum OpenOutcome {
    Error(String),
    Opened {
        uuid: String,
        dlt: i32,
        capif: String,
        channels: Vec<String>,
        msg: String,
    },
}

/// Outcome of a single channel-set attempt, after the source's own failure
/// policy has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// Channel applied.
    Ok,
    /// Set failed but the source chose to keep running (hop tolerance).
    Tolerated,
    /// Unrecoverable; the loop terminates after reporting.
    Fatal(String),
}

/// Outbound reporting surface handed to source callbacks.
pub trait Reporter {
    fn send_message(&mut self, severity: Severity, text: &str);
    fn send_configresp(&mut self, seqno: u32, success: bool, msg: &str, channel: Option<&str>);
}

/// The seam a capture helper implements.
pub trait CaptureSource {
    /// Parsed private channel representation, produced by `translate_channel`
    /// and consumed by `set_channel`.
    type Channel: Clone + Send + 'static;

    fn probe(&mut self, def: &SourceDefinition, rep: &mut dyn Reporter) -> ProbeOutcome;
    fn open(&mut self, def: &SourceDefinition, rep: &mut dyn Reporter) -> OpenOutcome;
    fn list(&mut self) -> Vec<DeviceEntry>;
    fn translate_channel(&self, chanstr: &str, rep: &mut dyn Reporter) -> Option<Self::Channel>;
    fn set_channel(
        &mut self,
        channel: &Self::Channel,
        seqno: u32,
        rep: &mut dyn Reporter,
    ) -> SetOutcome;
    fn start_capture(&mut self, sink: FrameSink) -> std::io::Result<JoinHandle<()>>;
}

struct FrameWriter {
    out: File,
}

/// Per-frame size cap: data frames are bounded by snaplen plus envelope,
/// control traffic by the full control cap.
fn frame_limit(reply: &ControlReply) -> u32 {
    match reply {
        ControlReply::Data { .. } => MAX_DATA_FRAME,
        _ => MAX_FRAME,
    }
}

impl FrameWriter {
    fn send(&mut self, reply: &ControlReply) -> Result<()> {
        let payload = encode_reply(reply)?;
        write_frame(&mut self.out, &payload, frame_limit(reply))
            .map_err(|e| ProtoError::io("writing control frame", e))
    }
}

struct WireReporter<'a> {
    writer: &'a mut FrameWriter,
}

impl Reporter for WireReporter<'_> {
    fn send_message(&mut self, severity: Severity, text: &str) {
        if let Err(e) = self.writer.send(&ControlReply::Message {
            severity,
            text: text.to_string(),
        }) {
            warn!("dropped outbound message: {e}");
        }
    }

    fn send_configresp(&mut self, seqno: u32, success: bool, msg: &str, channel: Option<&str>) {
        if let Err(e) = self.writer.send(&ControlReply::ConfigResp {
            seqno,
            success,
            msg: msg.to_string(),
            channel: channel.map(str::to_string),
        }) {
            warn!("dropped configure response: {e}");
        }
    }
}

struct HopSchedule<C> {
    order: Vec<C>,
    pos: usize,
    dwell: Duration,
    next_tick: Instant,
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Reorder a hop list so consecutive hops sit `spacing` entries apart,
/// still visiting every channel exactly once per cycle.
fn shuffle_order<C: Clone>(channels: &[C], spacing: usize) -> Vec<C> {
    let len = channels.len();
    if len == 0 {
        return Vec::new();
    }
    let spacing = spacing.clamp(1, len);
    let groups = gcd(len, spacing);
    let mut out = Vec::with_capacity(len);
    for offset in 0..groups {
        let mut i = offset;
        for _ in 0..len / groups {
            out.push(channels[i].clone());
            i = (i + spacing) % len;
        }
    }
    out
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct CaptureHandler<S: CaptureSource> {
    source: S,
    reader: File,
    writer: FrameWriter,
    ring: Arc<DataRing>,
    hop: Option<HopSchedule<S::Channel>>,
    hop_shuffle_spacing: usize,
    capture_thread: Option<JoinHandle<()>>,
    opened: bool,
}

impl<S: CaptureSource> CaptureHandler<S> {
    /// Build a handler over an fd pair handed down by the parent.
    ///
    /// Takes ownership of both descriptors; they are closed when the handler
    /// is dropped. The caller must not use them afterwards.
    pub fn from_fds(source: S, in_fd: RawFd, out_fd: RawFd) -> Self {
        let reader = unsafe { File::from_raw_fd(in_fd) };
        let out = unsafe { File::from_raw_fd(out_fd) };
        Self::new(source, reader, out)
    }

    pub fn new(source: S, reader: File, out: File) -> Self {
        Self {
            source,
            reader,
            writer: FrameWriter { out },
            ring: DataRing::new(DEFAULT_RING_BYTES),
            hop: None,
            hop_shuffle_spacing: 1,
            capture_thread: None,
            opened: false,
        }
    }

    /// Stride applied to hop schedules installed with `shuffle = true`.
    pub fn set_hop_shuffle_spacing(&mut self, spacing: usize) {
        self.hop_shuffle_spacing = spacing.max(1);
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Run the control loop until spindown, parent EOF or a fatal error.
    ///
    /// Teardown (ring shutdown, capture-thread join, final drain) happens on
    /// every exit path, including errors.
    pub fn run(&mut self) -> Result<()> {
        let result = self.run_loop();
        self.teardown();
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        info!("entering control loop");
        loop {
            self.drain_ring()?;
            if self.ring.spindown_requested() {
                debug!("spindown requested");
                break;
            }

            if self.poll_in(self.poll_timeout())? {
                match read_frame(&mut self.reader, MAX_FRAME)
                    .map_err(|e| ProtoError::io("reading control frame", e))?
                {
                    None => {
                        debug!("control channel closed by parent");
                        break;
                    }
                    Some(payload) => {
                        let request = decode_request(&payload)?;
                        if self.dispatch(request)? == Flow::Exit {
                            break;
                        }
                    }
                }
            }

            if self.hop_tick()? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    fn poll_timeout(&self) -> i32 {
        let mut timeout = DRAIN_TICK;
        if let Some(hop) = &self.hop {
            if !hop.order.is_empty() {
                let until = hop.next_tick.saturating_duration_since(Instant::now());
                timeout = timeout.min(until);
            }
        }
        timeout.as_millis() as i32
    }

    fn poll_in(&mut self, timeout_ms: i32) -> Result<bool> {
        let reader_fd = self.reader.as_fd();
        let mut fds = [PollFd::new(&reader_fd, PollFlags::POLLIN)];
        let n = match poll(&mut fds, timeout_ms) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => return Ok(false),
            Err(e) => {
                return Err(ProtoError::io(
                    "polling control fd",
                    std::io::Error::from_raw_os_error(e as i32),
                ))
            }
        };
        if n == 0 {
            return Ok(false);
        }
        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        // HUP/ERR surface as EOF on the following read.
        Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
    }

    fn dispatch(&mut self, request: ControlRequest) -> Result<Flow> {
        match request {
            ControlRequest::Probe { seqno, definition } => {
                let reply = match SourceDefinition::parse(&definition) {
                    Err(e) => ControlReply::ProbeResp {
                        seqno,
                        success: false,
                        msg: e.to_string(),
                        channels: Vec::new(),
                        chanset: None,
                    },
                    Ok(def) => {
                        let mut rep = WireReporter {
                            writer: &mut self.writer,
                        };
                        match self.source.probe(&def, &mut rep) {
                            ProbeOutcome::Error(msg) | ProbeOutcome::Unsupported(msg) => {
                                ControlReply::ProbeResp {
                                    seqno,
                                    success: false,
                                    msg,
                                    channels: Vec::new(),
                                    chanset: None,
                                }
                            }
                            ProbeOutcome::Supported { channels, chanset } => {
                                ControlReply::ProbeResp {
                                    seqno,
                                    success: true,
                                    msg: String::new(),
                                    channels,
                                    chanset,
                                }
                            }
                        }
                    }
                };
                self.writer.send(&reply)?;
                Ok(Flow::Continue)
            }

            ControlRequest::Open { seqno, definition } => self.handle_open(seqno, &definition),

            ControlRequest::List { seqno } => {
                let devices = self.source.list();
                self.writer.send(&ControlReply::ListResp { seqno, devices })?;
                Ok(Flow::Continue)
            }

            ControlRequest::Configure { seqno, tune } => {
                if seqno == 0 {
                    // 0 belongs to the hop scheduler; never accept it remotely.
                    self.writer.send(&ControlReply::Message {
                        severity: Severity::Error,
                        text: "rejecting configure with reserved seqno 0".into(),
                    })?;
                    return Ok(Flow::Continue);
                }
                if !self.opened {
                    self.writer.send(&ControlReply::ConfigResp {
                        seqno,
                        success: false,
                        msg: "source is not open".into(),
                        channel: None,
                    })?;
                    return Ok(Flow::Continue);
                }
                match tune {
                    TuneRequest::Channel { channel } => self.handle_set_channel(seqno, &channel),
                    TuneRequest::Hop {
                        rate_hz,
                        channels,
                        shuffle,
                    } => self.handle_set_hop(seqno, rate_hz, &channels, shuffle),
                }
            }

            ControlRequest::Shutdown => {
                info!("shutting down on parent request");
                Ok(Flow::Exit)
            }
        }
    }

    fn handle_open(&mut self, seqno: u32, definition: &str) -> Result<Flow> {
        if self.opened {
            self.writer.send(&ControlReply::OpenResp {
                seqno,
                success: false,
                msg: "source is already open".into(),
                uuid: None,
                dlt: 0,
                capif: None,
                channels: Vec::new(),
            })?;
            return Ok(Flow::Continue);
        }

        let def = match SourceDefinition::parse(definition) {
            Ok(def) => def,
            Err(e) => {
                self.writer.send(&ControlReply::OpenResp {
                    seqno,
                    success: false,
                    msg: e.to_string(),
                    uuid: None,
                    dlt: 0,
                    capif: None,
                    channels: Vec::new(),
                })?;
                return Ok(Flow::Continue);
            }
        };

        let outcome = {
            let mut rep = WireReporter {
                writer: &mut self.writer,
            };
            self.source.open(&def, &mut rep)
        };

        match outcome {
            OpenOutcome::Error(msg) => {
                self.writer.send(&ControlReply::OpenResp {
                    seqno,
                    success: false,
                    msg,
                    uuid: None,
                    dlt: 0,
                    capif: None,
                    channels: Vec::new(),
                })?;
                Ok(Flow::Continue)
            }
            OpenOutcome::Opened {
                uuid,
                dlt,
                capif,
                channels,
                msg,
            } => {
                match self.source.start_capture(self.ring.sink()) {
                    Ok(handle) => self.capture_thread = Some(handle),
                    Err(e) => {
                        let text = format!("could not start capture thread: {e}");
                        self.writer.send(&ControlReply::Error { text: text.clone() })?;
                        return Err(ProtoError::CaptureThread(e));
                    }
                }
                self.opened = true;
                self.writer.send(&ControlReply::OpenResp {
                    seqno,
                    success: true,
                    msg,
                    uuid: Some(uuid),
                    dlt,
                    capif: Some(capif),
                    channels,
                })?;
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_set_channel(&mut self, seqno: u32, channel: &str) -> Result<Flow> {
        let mut rep = WireReporter {
            writer: &mut self.writer,
        };
        let Some(parsed) = self.source.translate_channel(channel, &mut rep) else {
            self.writer.send(&ControlReply::ConfigResp {
                seqno,
                success: false,
                msg: format!("unable to parse channel '{channel}'"),
                channel: Some(channel.to_string()),
            })?;
            return Ok(Flow::Continue);
        };

        let mut rep = WireReporter {
            writer: &mut self.writer,
        };
        match self.source.set_channel(&parsed, seqno, &mut rep) {
            SetOutcome::Ok | SetOutcome::Tolerated => Ok(Flow::Continue),
            SetOutcome::Fatal(msg) => {
                self.writer.send(&ControlReply::ConfigResp {
                    seqno,
                    success: false,
                    msg: msg.clone(),
                    channel: Some(channel.to_string()),
                })?;
                self.writer.send(&ControlReply::Error { text: msg })?;
                Ok(Flow::Exit)
            }
        }
    }

    fn handle_set_hop(
        &mut self,
        seqno: u32,
        rate_hz: u32,
        channels: &[String],
        shuffle: bool,
    ) -> Result<Flow> {
        let mut parsed = Vec::with_capacity(channels.len());
        {
            let mut rep = WireReporter {
                writer: &mut self.writer,
            };
            for chanstr in channels {
                match self.source.translate_channel(chanstr, &mut rep) {
                    Some(ch) => parsed.push(ch),
                    None => rep.send_message(
                        Severity::Info,
                        &format!("dropping unusable channel '{chanstr}' from hop schedule"),
                    ),
                }
            }
        }

        if parsed.is_empty() {
            self.writer.send(&ControlReply::ConfigResp {
                seqno,
                success: false,
                msg: "no usable channels in hop set".into(),
                channel: None,
            })?;
            return Ok(Flow::Continue);
        }

        let count = parsed.len();
        let order = if shuffle {
            shuffle_order(&parsed, self.hop_shuffle_spacing)
        } else {
            parsed
        };
        let rate = rate_hz.max(1);
        self.hop = Some(HopSchedule {
            order,
            pos: 0,
            dwell: Duration::from_millis(1000 / u64::from(rate)),
            next_tick: Instant::now(),
        });

        self.writer.send(&ControlReply::ConfigResp {
            seqno,
            success: true,
            msg: format!("hopping across {count} channels at {rate} hz"),
            channel: None,
        })?;
        Ok(Flow::Continue)
    }

    fn hop_tick(&mut self) -> Result<Flow> {
        let channel = match self.hop.as_mut() {
            Some(hop) if !hop.order.is_empty() && Instant::now() >= hop.next_tick => {
                let ch = hop.order[hop.pos].clone();
                hop.pos = (hop.pos + 1) % hop.order.len();
                hop.next_tick = Instant::now() + hop.dwell;
                ch
            }
            _ => return Ok(Flow::Continue),
        };

        let mut rep = WireReporter {
            writer: &mut self.writer,
        };
        match self.source.set_channel(&channel, 0, &mut rep) {
            SetOutcome::Ok | SetOutcome::Tolerated => Ok(Flow::Continue),
            SetOutcome::Fatal(msg) => {
                self.writer.send(&ControlReply::Error { text: msg })?;
                Ok(Flow::Exit)
            }
        }
    }

    fn drain_ring(&mut self) -> Result<()> {
        for reply in self.ring.drain() {
            match self.writer.send(&reply) {
                Ok(()) => {}
                // A data frame above the cap is a broken driver, not a broken
                // stream: the size check fires before anything is written, so
                // drop the frame and keep capturing.
                Err(ProtoError::Io { ref source, .. })
                    if matches!(reply, ControlReply::Data { .. })
                        && source.kind() == std::io::ErrorKind::InvalidData =>
                {
                    warn!("dropping oversized data frame: {source}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.ring.shutdown();
        if let Err(e) = self.drain_ring() {
            warn!("teardown drain failed: {e}");
        }
        if let Some(handle) = self.capture_thread.take() {
            debug!("joining capture thread");
            let _ = handle.join();
        }
        // Pick up anything the capture thread reported on its way out.
        if let Err(e) = self.drain_ring() {
            warn!("final drain failed: {e}");
        }
        info!("control loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn shuffle_covers_every_channel_once() {
        let channels: Vec<u32> = (0..12).collect();
        let order = shuffle_order(&channels, 4);
        assert_eq!(order.len(), 12);
        assert_eq!(order.iter().copied().collect::<HashSet<_>>().len(), 12);
        // Consecutive hops are spaced apart within a group.
        assert_eq!(&order[..3], &[0, 4, 8]);
    }

    #[test]
    fn shuffle_with_coprime_stride() {
        let channels: Vec<u32> = (0..11).collect();
        let order = shuffle_order(&channels, 4);
        assert_eq!(order.len(), 11);
        assert_eq!(order.iter().copied().collect::<HashSet<_>>().len(), 11);
        assert_eq!(order[0], 0);
        assert_eq!(order[1], 4);
    }

    #[test]
    fn shuffle_degenerate_cases() {
        let empty: Vec<u32> = Vec::new();
        assert!(shuffle_order(&empty, 4).is_empty());
        assert_eq!(shuffle_order(&[7u32], 4), vec![7]);
    }

    #[test]
    fn data_frames_answer_to_the_tighter_cap() {
        assert!(MAX_DATA_FRAME < MAX_FRAME);

        let data = ControlReply::Data {
            ts_sec: 0,
            ts_usec: 0,
            dlt: 127,
            packet: vec![0; 16],
        };
        assert_eq!(frame_limit(&data), MAX_DATA_FRAME);

        let message = ControlReply::Message {
            severity: Severity::Info,
            text: "x".into(),
        };
        assert_eq!(frame_limit(&message), MAX_FRAME);
    }
}
