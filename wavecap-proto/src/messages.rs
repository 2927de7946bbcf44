//! Control and data messages carried on the fd pair.
//!
//! `seqno == 0` is reserved for channel sets initiated by the internal hop
//! scheduler; the parent must always send a nonzero seqno.

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
}

/// One enumerated capture-capable device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub flags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TuneRequest {
    /// Explicit tune to a single channel; failure is fatal.
    Channel { channel: String },
    /// Install a hop schedule; the scheduler tunes with seqno 0.
    Hop {
        rate_hz: u32,
        channels: Vec<String>,
        shuffle: bool,
    },
}

/// Parent to helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlRequest {
    Probe { seqno: u32, definition: String },
    Open { seqno: u32, definition: String },
    List { seqno: u32 },
    Configure { seqno: u32, tune: TuneRequest },
    Shutdown,
}

/// Helper to parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlReply {
    Message {
        severity: Severity,
        text: String,
    },
    ProbeResp {
        seqno: u32,
        success: bool,
        msg: String,
        channels: Vec<String>,
        chanset: Option<String>,
    },
    OpenResp {
        seqno: u32,
        success: bool,
        msg: String,
        uuid: Option<String>,
        dlt: i32,
        capif: Option<String>,
        channels: Vec<String>,
    },
    ListResp {
        seqno: u32,
        devices: Vec<DeviceEntry>,
    },
    ConfigResp {
        seqno: u32,
        success: bool,
        msg: String,
        channel: Option<String>,
    },
    /// One captured frame, caplen bytes, timestamp from the driver verbatim.
    Data {
        ts_sec: i64,
        ts_usec: i64,
        dlt: i32,
        packet: Vec<u8>,
    },
    /// Fatal; the parent should reap the helper after this.
    Error {
        text: String,
    },
}

pub fn encode_reply(reply: &ControlReply) -> Result<Vec<u8>> {
    bincode::serialize(reply).map_err(|e| ProtoError::Encode(e.to_string()))
}

pub fn decode_reply(payload: &[u8]) -> Result<ControlReply> {
    bincode::deserialize(payload).map_err(|e| ProtoError::Decode(e.to_string()))
}

pub fn encode_request(request: &ControlRequest) -> Result<Vec<u8>> {
    bincode::serialize(request).map_err(|e| ProtoError::Encode(e.to_string()))
}

pub fn decode_request(payload: &[u8]) -> Result<ControlRequest> {
    bincode::deserialize(payload).map_err(|e| ProtoError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_codec_round_trip() {
        let req = ControlRequest::Configure {
            seqno: 9,
            tune: TuneRequest::Hop {
                rate_hz: 5,
                channels: vec!["1".into(), "6HT40+".into(), "36VHT80".into()],
                shuffle: true,
            },
        };
        let bytes = bincode::serialize(&req).unwrap();
        assert_eq!(decode_request(&bytes).unwrap(), req);
    }

    #[test]
    fn json_shape_is_stable_for_debug_dumps() {
        // Not the wire format, but dump tooling relies on the tag casing.
        let json = serde_json::to_value(&ControlRequest::List { seqno: 4 }).unwrap();
        assert_eq!(json["type"], "list");
        let json = serde_json::to_value(&ControlReply::Message {
            severity: Severity::Info,
            text: "hi".into(),
        })
        .unwrap();
        assert_eq!(json["data"]["severity"], "info");
    }

    #[test]
    fn data_reply_carries_raw_bytes() {
        let reply = ControlReply::Data {
            ts_sec: 1_700_000_000,
            ts_usec: 123_456,
            dlt: 127,
            packet: vec![0x00, 0x00, 0x0c, 0x00, 0xde, 0xad],
        };
        let bytes = encode_reply(&reply).unwrap();
        let back: ControlReply = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, reply);
    }
}
