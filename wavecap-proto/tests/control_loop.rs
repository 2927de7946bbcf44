//! End-to-end exercise of the control loop over a real pipe pair, with a
//! stub source standing in for the hardware.

use std::fs::File;
use std::io::Write;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::thread::JoinHandle;

use wavecap_proto::{
    decode_reply, encode_frame, encode_request, read_frame, CaptureHandler, CaptureSource,
    ControlReply, ControlRequest, DeviceEntry, FrameSink, OpenOutcome, ProbeOutcome, Reporter,
    SetOutcome, SourceDefinition, TuneRequest, MAX_FRAME,
};

#[derive(Default)]
struct StubSource {
    sets: Vec<(String, u32)>,
    oversize_first: bool,
}

impl CaptureSource for StubSource {
    type Channel = String;

    fn probe(&mut self, def: &SourceDefinition, _rep: &mut dyn Reporter) -> ProbeOutcome {
        if def.interface() == "nope0" {
            return ProbeOutcome::Unsupported("no channels".into());
        }
        ProbeOutcome::Supported {
            channels: vec!["1".into(), "6".into(), "11".into()],
            chanset: None,
        }
    }

    fn open(&mut self, def: &SourceDefinition, _rep: &mut dyn Reporter) -> OpenOutcome {
        self.oversize_first = def.flag_bool("bigframe");
        OpenOutcome::Opened {
            uuid: "00000000-0000-0000-0000-000000000000".into(),
            dlt: 127,
            capif: format!("{}mon", def.interface()),
            channels: vec!["1".into(), "6".into()],
            msg: "stub open".into(),
        }
    }

    fn list(&mut self) -> Vec<DeviceEntry> {
        vec![DeviceEntry {
            name: "wlan0".into(),
            flags: None,
        }]
    }

    fn translate_channel(&self, chanstr: &str, _rep: &mut dyn Reporter) -> Option<String> {
        if chanstr == "bogus" {
            None
        } else {
            Some(chanstr.to_string())
        }
    }

    fn set_channel(&mut self, channel: &String, seqno: u32, rep: &mut dyn Reporter) -> SetOutcome {
        self.sets.push((channel.clone(), seqno));
        if seqno != 0 {
            rep.send_configresp(seqno, true, "", Some(channel));
        }
        SetOutcome::Ok
    }

    fn start_capture(&mut self, sink: FrameSink) -> std::io::Result<JoinHandle<()>> {
        let oversize_first = self.oversize_first;
        std::thread::Builder::new()
            .name("stub-capture".into())
            .spawn(move || {
                if oversize_first {
                    sink.send_data(99, 0, 127, &vec![0u8; 80_000]);
                }
                sink.send_data(100, 7, 127, &[0xaa, 0xbb]);
            })
    }
}

struct Harness {
    to_helper: File,
    from_helper: File,
    helper: JoinHandle<StubSource>,
}

fn start_harness() -> Harness {
    let (req_rx, req_tx) = nix::unistd::pipe().unwrap();
    let (resp_rx, resp_tx) = nix::unistd::pipe().unwrap();

    let helper = std::thread::spawn(move || {
        let mut handler = CaptureHandler::from_fds(
            StubSource::default(),
            req_rx.into_raw_fd(),
            resp_tx.into_raw_fd(),
        );
        handler.run().unwrap();
        handler.into_source()
    });

    Harness {
        to_helper: unsafe { File::from_raw_fd(req_tx.into_raw_fd()) },
        from_helper: unsafe { File::from_raw_fd(resp_rx.into_raw_fd()) },
        helper,
    }
}

impl Harness {
    fn send(&mut self, request: &ControlRequest) {
        let frame = encode_frame(&encode_request(request).unwrap());
        self.to_helper.write_all(&frame).unwrap();
    }

    fn recv(&mut self) -> ControlReply {
        self.try_recv().expect("helper closed the reply channel early")
    }

    fn try_recv(&mut self) -> Option<ControlReply> {
        read_frame(&mut self.from_helper, MAX_FRAME)
            .unwrap()
            .map(|payload| decode_reply(&payload).unwrap())
    }
}

#[test]
fn probe_then_shutdown() {
    let mut h = start_harness();

    h.send(&ControlRequest::Probe {
        seqno: 1,
        definition: "wlan0:fcsfail=true".into(),
    });
    match h.recv() {
        ControlReply::ProbeResp {
            seqno: 1,
            success: true,
            channels,
            ..
        } => assert_eq!(channels, vec!["1", "6", "11"]),
        other => panic!("unexpected reply: {other:?}"),
    }

    h.send(&ControlRequest::Shutdown);
    h.helper.join().unwrap();
}

#[test]
fn open_streams_data_and_configure_tunes() {
    let mut h = start_harness();

    h.send(&ControlRequest::Open {
        seqno: 2,
        definition: "wlan0".into(),
    });
    match h.recv() {
        ControlReply::OpenResp {
            seqno: 2,
            success: true,
            capif: Some(capif),
            dlt: 127,
            ..
        } => assert_eq!(capif, "wlan0mon"),
        other => panic!("unexpected reply: {other:?}"),
    }

    h.send(&ControlRequest::Configure {
        seqno: 3,
        tune: TuneRequest::Channel {
            channel: "6HT40+".into(),
        },
    });

    // The data frame from the stub capture thread and the configure response
    // may interleave; collect until both are seen.
    let mut saw_data = false;
    let mut saw_configresp = false;
    while !(saw_data && saw_configresp) {
        match h.recv() {
            ControlReply::Data {
                ts_sec: 100,
                ts_usec: 7,
                dlt: 127,
                packet,
            } => {
                assert_eq!(packet, vec![0xaa, 0xbb]);
                saw_data = true;
            }
            ControlReply::ConfigResp {
                seqno: 3,
                success: true,
                channel: Some(ch),
                ..
            } => {
                assert_eq!(ch, "6HT40+");
                saw_configresp = true;
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    h.send(&ControlRequest::Shutdown);
    let source = h.helper.join().unwrap();
    assert_eq!(source.sets, vec![("6HT40+".to_string(), 3)]);
}

#[test]
fn oversized_data_frames_are_dropped_not_fatal() {
    let mut h = start_harness();

    // bigframe=true makes the stub emit one packet well past the data cap
    // before the normal one.
    h.send(&ControlRequest::Open {
        seqno: 1,
        definition: "wlan0:bigframe=true".into(),
    });
    assert!(matches!(
        h.recv(),
        ControlReply::OpenResp { success: true, .. }
    ));

    // Only the frame inside the cap arrives; the loop keeps running.
    match h.recv() {
        ControlReply::Data { ts_sec, packet, .. } => {
            assert_eq!(ts_sec, 100);
            assert_eq!(packet, vec![0xaa, 0xbb]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    h.send(&ControlRequest::Shutdown);
    h.helper.join().unwrap();
}

#[test]
fn configure_with_reserved_seqno_is_rejected() {
    let mut h = start_harness();

    h.send(&ControlRequest::Configure {
        seqno: 0,
        tune: TuneRequest::Channel {
            channel: "1".into(),
        },
    });
    match h.recv() {
        ControlReply::Message { text, .. } => assert!(text.contains("seqno 0")),
        other => panic!("unexpected reply: {other:?}"),
    }

    h.send(&ControlRequest::Shutdown);
    h.helper.join().unwrap();
}

#[test]
fn hop_schedule_tunes_with_seqno_zero() {
    let mut h = start_harness();

    h.send(&ControlRequest::Open {
        seqno: 1,
        definition: "wlan0".into(),
    });
    assert!(matches!(
        h.recv(),
        ControlReply::OpenResp { success: true, .. }
    ));

    h.send(&ControlRequest::Configure {
        seqno: 2,
        tune: TuneRequest::Hop {
            rate_hz: 50,
            channels: vec!["1".into(), "6".into(), "bogus".into(), "11".into()],
            shuffle: false,
        },
    });

    // Wait for the schedule to be acknowledged, skipping interleaved data
    // frames and the dropped-channel notice.
    loop {
        match h.recv() {
            ControlReply::ConfigResp {
                seqno: 2, success, ..
            } => {
                assert!(success);
                break;
            }
            ControlReply::Message { text, .. } => assert!(text.contains("bogus")),
            ControlReply::Data { .. } => {}
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    // Let the scheduler run a few dwell periods, then wind down and drain.
    std::thread::sleep(std::time::Duration::from_millis(150));
    h.send(&ControlRequest::Shutdown);
    while h.try_recv().is_some() {}

    let source = h.helper.join().unwrap();
    let hop_sets: Vec<_> = source.sets.iter().filter(|(_, s)| *s == 0).collect();
    assert!(!hop_sets.is_empty(), "hop scheduler never tuned");
    assert!(hop_sets.iter().all(|(ch, _)| ch != "bogus"));
}
