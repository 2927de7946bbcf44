#![deny(unsafe_op_in_unsafe_fn)]
//! # wavecap-proto
//!
//! Wire protocol and host-side framework shared by wavecap capture helpers.
//!
//! A capture helper is a privileged subprocess driven by a supervising parent
//! over a pair of file descriptors. This crate owns both halves of that
//! contract: the length-prefixed frame format with its control and data
//! messages, and the [`CaptureHandler`] event loop a helper binary plugs a
//! [`CaptureSource`] into. The handler runs the control plane (probe, open,
//! list, configure, channel hopping) on the calling thread; captured frames
//! arrive from the helper's capture thread through a bounded [`ring`] with
//! blocking backpressure.

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest control frame accepted in either direction.
pub const MAX_FRAME: u32 = 1_048_576;

/// Largest outbound data frame: 64 KiB of envelope headroom on top of the
/// 8 KiB snaplen wavecap helpers capture with. A single packet can never
/// legitimately come close to the control cap, so data frames answer to
/// this tighter bound.
pub const MAX_DATA_FRAME: u32 = 64 * 1024 + 8 * 1024;

mod definition;
mod error;
mod handler;
mod messages;
mod ring;
mod wire;

pub use definition::SourceDefinition;
pub use error::{ProtoError, Result};
pub use handler::{
    CaptureHandler, CaptureSource, OpenOutcome, ProbeOutcome, Reporter, SetOutcome,
};
pub use messages::{
    decode_reply, decode_request, encode_reply, encode_request, ControlReply, ControlRequest,
    DeviceEntry, Severity, TuneRequest,
};
pub use ring::{DataRing, FrameSink, SendStatus};
pub use wire::{encode_frame, read_frame, write_frame, FrameError};
