//! The Wi-Fi capture source: interface probe, monitor bring-up and channel
//! control, wired into the framework's [`CaptureSource`] seam.
//!
//! One process drives one interface. All state lives in [`WifiSource`],
//! written during `open` on the control thread; afterwards the capture
//! thread only ever reads the pieces it was handed at spawn.

use std::io;
use std::thread::JoinHandle;

use tracing::{debug, info};
use wavecap_netlink::nl80211::{HtMode as NlHtMode, MonitorFlag, Nl80211Socket, Width};
use wavecap_netlink::{ifcontrol, rfkill, wext, NetlinkError, NmClient};
use wavecap_proto::{
    CaptureSource, DeviceEntry, FrameSink, OpenOutcome, ProbeOutcome, Reporter, SetOutcome,
    Severity, SourceDefinition,
};

use crate::capture;
use crate::channels::{self, ChannelWidth, HtMode, WifiChannel};
use crate::phy_table;
use crate::uuid::synthetic_uuid;

const SNAPLEN: i32 = 8192;
const PCAP_TIMEOUT_MS: i32 = 1000;

/// Consecutive hop-time tuning failures tolerated before giving up.
const MAX_SEQ_CHANNEL_FAILURES: u32 = 10;

const IFNAMSIZ: usize = 16;

/// Which control plane channel changes go through, decided once at open.
///
/// The netlink variant owns the socket/family pair; falling back to ioctl
/// drops it, so no later code path can reach a half-dead netlink handle.
enum ControlPlane {
    Nl80211(Nl80211Socket),
    Ioctl,
}

pub struct WifiSource {
    interface: Option<String>,
    cap_interface: Option<String>,
    datalink_type: i32,
    control: ControlPlane,
    seq_channel_failure: u32,
    reset_nm_on_exit: bool,
    pcap: Option<pcap::Capture<pcap::Active>>,
}

impl WifiSource {
    pub fn new() -> Self {
        Self {
            interface: None,
            cap_interface: None,
            datalink_type: -1,
            control: ControlPlane::Ioctl,
            seq_channel_failure: 0,
            reset_nm_on_exit: false,
            pcap: None,
        }
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// True when NetworkManager managed the interface before we disowned it
    /// and should be told to take it back on exit.
    pub fn reset_nm_on_exit(&self) -> bool {
        self.reset_nm_on_exit
    }

    fn tune(&mut self, channel: &WifiChannel) -> Result<(), NetlinkError> {
        match &mut self.control {
            ControlPlane::Ioctl => {
                // Legacy plane only understands the control channel.
                let interface = self.interface.as_deref().unwrap_or_default();
                wext::set_channel(interface, channel.control_freq)
            }
            ControlPlane::Nl80211(nl) => {
                let capif = self.cap_interface.as_deref().unwrap_or_default();
                let freq = control_mhz(channel.control_freq);
                if channel.width != ChannelWidth::Default20 {
                    nl.set_frequency(
                        capif,
                        freq,
                        match channel.width {
                            ChannelWidth::W5 => Width::W5,
                            ChannelWidth::W10 => Width::W10,
                            ChannelWidth::Vht80 => Width::W80,
                            ChannelWidth::Vht160 => Width::W160,
                            ChannelWidth::Default20 => unreachable!(),
                        },
                        channel.center_freq1,
                        channel.center_freq2,
                    )
                } else {
                    let ht = match channel.ht {
                        HtMode::NoHt => NlHtMode::NoHt,
                        HtMode::Ht40Minus => NlHtMode::Ht40Minus,
                        HtMode::Ht40Plus => NlHtMode::Ht40Plus,
                    };
                    nl.set_channel(capif, freq, ht)
                }
            }
        }
    }

    /// Ask NetworkManager to stop touching the interface. Informational on
    /// every failure; the client must not outlive this call or NM keeps
    /// queueing events at us.
    fn disown_from_networkmanager(&mut self, interface: &str, rep: &mut dyn Reporter) {
        let nm = match NmClient::connect() {
            Ok(nm) => nm,
            Err(e) => {
                rep.send_message(
                    Severity::Info,
                    &format!(
                        "Could not connect to NetworkManager, cannot automatically prevent \
                         interface '{interface}' from being modified if NetworkManager is \
                         running: {e}"
                    ),
                );
                return;
            }
        };

        if !nm.running() {
            return;
        }
        let Ok(path) = nm.device_path(interface) else {
            return;
        };

        if nm.device_managed(&path).unwrap_or(false) {
            rep.send_message(
                Severity::Info,
                &format!(
                    "Telling NetworkManager not to control interface '{interface}': you may \
                     need to re-initialize this interface later or tell NetworkManager to \
                     control it again via 'nmcli'"
                ),
            );
            match nm.set_device_managed(&path, false) {
                Ok(()) => self.reset_nm_on_exit = true,
                Err(e) => rep.send_message(
                    Severity::Info,
                    &format!("Failed to tell NetworkManager to release '{interface}': {e}"),
                ),
            }
        }
    }
}

impl Default for WifiSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel numbers below 1024 are mapped to MHz through the PHY table;
/// anything else is taken as MHz already. Unknown numbers pass through for
/// the driver to veto.
fn control_mhz(control_freq: u32) -> u32 {
    if control_freq > 1024 {
        return control_freq;
    }
    phy_table::lookup(control_freq)
        .map(|entry| entry.freq)
        .unwrap_or(control_freq)
}

/// Channel list for an interface: nl80211 band dump preferred, wext range
/// ioctl as the legacy fallback (which only yields bare channel numbers).
fn populate_chanlist(interface: &str) -> Result<Vec<String>, NetlinkError> {
    match Nl80211Socket::connect().and_then(|mut nl| nl.channel_frequencies(interface)) {
        Ok(freqs) if !freqs.is_empty() => Ok(freqs
            .into_iter()
            .map(|freq| match phy_table::freq_to_channel(freq) {
                Some(chan) => chan.to_string(),
                None => freq.to_string(),
            })
            .collect()),
        _ => {
            let channels = wext::channel_list(interface)?;
            Ok(channels.into_iter().map(|c| c.to_string()).collect())
        }
    }
}

/// How the capture thread's view of the system is obtained; faked in tests.
trait DeviceView {
    fn exists(&self, name: &str) -> bool;
    fn wireless_mode(&self, name: &str) -> Option<u32>;
    /// A different interface sharing this MAC and already in monitor mode.
    fn monitor_sibling(&self, ignored: &str, mac: &[u8; 6]) -> Option<String>;
}

struct SysDeviceView;

impl DeviceView for SysDeviceView {
    fn exists(&self, name: &str) -> bool {
        ifcontrol::interface_exists(name)
    }

    fn wireless_mode(&self, name: &str) -> Option<u32> {
        wext::get_mode(name).ok()
    }

    fn monitor_sibling(&self, ignored: &str, mac: &[u8; 6]) -> Option<String> {
        for name in ifcontrol::list_interfaces().ok()? {
            if name == ignored {
                continue;
            }
            let Ok(other_mac) = ifcontrol::hardware_address(&name) else {
                continue;
            };
            if other_mac == *mac && wext::get_mode(&name).ok() == Some(wext::IW_MODE_MONITOR) {
                return Some(name);
            }
        }
        None
    }
}

/// Pick the name of the interface we will actually capture from.
///
/// Precedence: an explicit `vif=` flag, then an existing monitor sibling
/// with the same MAC, then `<interface>mon` when it fits in IFNAMSIZ, then
/// the lowest free `kismonN`. Errors are fatal open failures.
fn select_capture_name(
    interface: &str,
    vif: Option<&str>,
    mac: &[u8; 6],
    view: &dyn DeviceView,
) -> Result<String, String> {
    if let Some(vif) = vif {
        return Ok(vif.to_string());
    }

    if let Some(sibling) = view.monitor_sibling(interface, mac) {
        return Ok(sibling);
    }

    if interface.len() + 3 >= IFNAMSIZ {
        // No room for the 'mon' suffix; fall back to an unrelated name.
        for n in 0..100 {
            let name = format!("kismon{n}");
            if !view.exists(&name) {
                return Ok(name);
            }
        }
        return Err(format!(
            "Could not append 'mon' extension to existing interface ({interface}) and \
             could not find a free kismonN within 100 tries"
        ));
    }

    let name = format!("{interface}mon");
    if let Some(mode) = view.wireless_mode(&name) {
        if mode != wext::IW_MODE_MONITOR {
            return Err(format!(
                "A monitor vif already exists for interface '{interface}' ({name}) but \
                 isn't in monitor mode, check that NetworkManager isn't hijacking the \
                 interface, delete the false monitor vif, and try again."
            ));
        }
    }
    Ok(name)
}

/// Apply the channel-set failure policy to one tuning attempt.
///
/// Hop-scheduler sets (`seqno == 0`) tolerate up to
/// [`MAX_SEQ_CHANNEL_FAILURES`] consecutive misses with an error message
/// each; the next miss is fatal. Explicit sets are strict: the first
/// failure is fatal, and success is acknowledged with a configure response
/// naming the channel that actually landed.
fn apply_channel_set_result(
    failures: &mut u32,
    seqno: u32,
    result: Result<(), NetlinkError>,
    channel: &WifiChannel,
    rep: &mut dyn Reporter,
) -> SetOutcome {
    let chanstr = channels::render(channel);
    match result {
        Ok(()) => {
            *failures = 0;
            if seqno != 0 {
                rep.send_configresp(seqno, true, "", Some(&chanstr));
            }
            SetOutcome::Ok
        }
        Err(e) => {
            if seqno == 0 && *failures < MAX_SEQ_CHANNEL_FAILURES {
                *failures += 1;
                rep.send_message(
                    Severity::Error,
                    &format!("Could not set channel {chanstr}; ignoring error and continuing ({e})"),
                );
                SetOutcome::Tolerated
            } else {
                SetOutcome::Fatal(format!("failed to set channel {chanstr}: {e}"))
            }
        }
    }
}

impl CaptureSource for WifiSource {
    type Channel = WifiChannel;

    fn probe(&mut self, def: &SourceDefinition, _rep: &mut dyn Reporter) -> ProbeOutcome {
        let interface = def.interface();
        match populate_chanlist(interface) {
            Ok(channels) if !channels.is_empty() => ProbeOutcome::Supported {
                channels,
                chanset: None,
            },
            Ok(_) => ProbeOutcome::Unsupported(format!("no channels available on '{interface}'")),
            Err(e) => ProbeOutcome::Unsupported(format!(
                "unable to fetch channels from '{interface}': {e}"
            )),
        }
    }

    fn open(&mut self, def: &SourceDefinition, rep: &mut dyn Reporter) -> OpenOutcome {
        let interface = def.interface().to_string();
        self.interface = Some(interface.clone());

        let mac = match ifcontrol::hardware_address(&interface) {
            Ok(mac) => mac,
            Err(e) => {
                return OpenOutcome::Error(format!(
                    "Could not fetch interface address from '{interface}': {e}"
                ))
            }
        };

        // Hard rfkill is an operator problem; soft rfkill we can clear.
        if rfkill::hard_blocked(&interface).unwrap_or(false) {
            return OpenOutcome::Error(format!(
                "Interface '{interface}' is set to hard rfkill; check your wireless switch \
                 if you have one."
            ));
        }
        if rfkill::soft_blocked(&interface).unwrap_or(false) {
            if let Err(e) = rfkill::clear_soft_block(&interface) {
                return OpenOutcome::Error(format!(
                    "Unable to activate interface '{interface}' set to soft rfkill: {e}"
                ));
            }
            rep.send_message(
                Severity::Info,
                &format!("Removed soft-rfkill and enabled interface '{interface}'"),
            );
        }

        let uuid = synthetic_uuid(&mac);
        debug!(interface = %interface, uuid = %uuid, "generated source uuid");

        let mode = match wext::get_mode(&interface) {
            Ok(mode) => mode,
            Err(e) => {
                return OpenOutcome::Error(format!(
                    "Unable to get current wireless mode of interface '{interface}': {e}"
                ))
            }
        };

        self.disown_from_networkmanager(&interface, rep);

        let mut cap_interface = if mode != wext::IW_MODE_MONITOR {
            match select_capture_name(&interface, def.flag("vif"), &mac, &SysDeviceView) {
                Ok(name) => name,
                Err(msg) => return OpenOutcome::Error(msg),
            }
        } else {
            interface.clone()
        };

        // The chosen name may already exist in monitor mode (a sibling we
        // are reusing); re-check the parent's mode tolerantly before acting.
        let mode = wext::get_mode(&interface).ok();
        let nl = Nl80211Socket::connect().ok();

        if mode != Some(wext::IW_MODE_MONITOR)
            && nl.is_some()
            && cap_interface != interface
        {
            let mut flags = vec![MonitorFlag::Control, MonitorFlag::OtherBss];
            if def.flag_bool("fcsfail") {
                rep.send_message(
                    Severity::Info,
                    &format!(
                        "Source '{interface}' configuring monitor interface to pass packets \
                         which fail FCS checksum"
                    ),
                );
                flags.push(MonitorFlag::FcsFail);
            }
            if def.flag_bool("plcpfail") {
                rep.send_message(
                    Severity::Info,
                    &format!(
                        "Source '{interface}' configuring monitor interface to pass packets \
                         which fail PLCP checksum"
                    ),
                );
                flags.push(MonitorFlag::PlcpFail);
            }

            let mut nl = nl.unwrap();
            match nl.create_monitor_vif(&interface, &cap_interface, &flags) {
                Ok(()) => {
                    rep.send_message(
                        Severity::Info,
                        &format!(
                            "Successfully created monitor interface '{cap_interface}' for \
                             interface '{interface}'"
                        ),
                    );
                    self.control = ControlPlane::Nl80211(nl);
                }
                Err(e) => {
                    rep.send_message(
                        Severity::Error,
                        &format!(
                            "Failed to create monitor vif interface '{cap_interface}' for \
                             interface '{interface}': {e}"
                        ),
                    );

                    // Maybe it is a wext device after all; switch in place.
                    if let Err(e2) = wext::set_mode(&interface, wext::IW_MODE_MONITOR) {
                        rep.send_message(
                            Severity::Error,
                            &format!(
                                "Failed to put interface '{interface}' in monitor mode: {e2}"
                            ),
                        );
                        return OpenOutcome::Error(format!(
                            "Failed to create a monitor vif and could not set mode of \
                             existing interface, unable to put '{interface}' into monitor mode."
                        ));
                    }

                    rep.send_message(
                        Severity::Info,
                        &format!(
                            "Configured '{interface}' as monitor mode interface instead of \
                             using a monitor vif; will continue using this interface as the \
                             capture source."
                        ),
                    );
                    // Netlink handles go away as a unit and the capture
                    // interface is the parent again, so every later step
                    // agrees on the legacy plane.
                    drop(nl);
                    self.control = ControlPlane::Ioctl;
                    cap_interface = interface.clone();
                }
            }
        } else if mode != Some(wext::IW_MODE_MONITOR) {
            if let Err(e) = wext::set_mode(&interface, wext::IW_MODE_MONITOR) {
                rep.send_message(
                    Severity::Error,
                    &format!("Failed to put interface '{interface}' in monitor mode: {e}"),
                );
                return OpenOutcome::Error(format!(
                    "Could not create a monitor vif and could not set mode of existing \
                     interface, unable to put '{interface}' into monitor mode."
                ));
            }
            rep.send_message(
                Severity::Info,
                &format!(
                    "Configured '{interface}' as monitor mode interface instead of using \
                     a monitor vif"
                ),
            );
            self.control = ControlPlane::Ioctl;
            cap_interface = interface.clone();
        } else {
            rep.send_message(
                Severity::Info,
                &format!(
                    "Monitor interface '{cap_interface}' already exists for capture \
                     interface '{interface}', we'll use that."
                ),
            );
            self.control = match nl {
                Some(nl) => ControlPlane::Nl80211(nl),
                None => ControlPlane::Ioctl,
            };
        }

        self.cap_interface = Some(cap_interface.clone());

        // A vif needs its parent down (unless told otherwise) and itself up;
        // an in-place monitor interface just needs to be up.
        if cap_interface != interface {
            if def.flag_bool("ignoreprimary") {
                rep.send_message(
                    Severity::Info,
                    &format!(
                        "Source '{interface}' ignoring state of primary interface and \
                         leaving it in an 'up' state; this may cause problems with \
                         channel hopping."
                    ),
                );
            } else {
                rep.send_message(
                    Severity::Info,
                    &format!("Bringing down parent interface '{interface}'"),
                );
                if let Err(e) = ifcontrol::interface_down(&interface) {
                    return OpenOutcome::Error(format!(
                        "Could not bring down parent interface '{interface}' to capture \
                         using '{cap_interface}': {e}"
                    ));
                }
            }
        }

        if let Err(e) = ifcontrol::interface_up(&cap_interface) {
            return OpenOutcome::Error(format!(
                "Could not bring up capture interface '{cap_interface}', check 'dmesg' \
                 for errors loading firmware: {e}"
            ));
        }

        // Vifs expose their own channel list; re-read against what we will
        // actually capture from.
        let channels = match populate_chanlist(&cap_interface) {
            Ok(channels) => channels,
            Err(e) => {
                return OpenOutcome::Error(format!(
                    "Could not get list of channels from capture interface \
                     '{cap_interface}' on '{interface}': {e}"
                ))
            }
        };

        let cap = match pcap::Capture::from_device(cap_interface.as_str()) {
            Ok(cap) => cap,
            Err(e) => {
                return OpenOutcome::Error(format!(
                    "Could not open capture interface '{cap_interface}' on '{interface}' \
                     as a pcap capture: {e}"
                ))
            }
        };
        let cap = match cap
            .snaplen(SNAPLEN)
            .promisc(true)
            .timeout(PCAP_TIMEOUT_MS)
            .open()
        {
            Ok(cap) => cap,
            Err(e) => {
                return OpenOutcome::Error(format!(
                    "Could not open capture interface '{cap_interface}' on '{interface}' \
                     as a pcap capture: {e}"
                ))
            }
        };

        self.datalink_type = cap.get_datalink().0;
        self.pcap = Some(cap);

        let msg = if cap_interface != interface {
            format!(
                "Linux Wi-Fi capturing from monitor vif '{cap_interface}' on interface \
                 '{interface}'"
            )
        } else {
            format!("Linux Wi-Fi capturing from interface '{interface}'")
        };
        info!("{msg}");

        OpenOutcome::Opened {
            uuid,
            dlt: self.datalink_type,
            capif: cap_interface,
            channels,
            msg,
        }
    }

    fn list(&mut self) -> Vec<DeviceEntry> {
        let Ok(names) = ifcontrol::list_interfaces() else {
            return Vec::new();
        };
        names
            .into_iter()
            .filter(|name| ifcontrol::is_wireless_interface(name))
            .map(|name| DeviceEntry { name, flags: None })
            .collect()
    }

    fn translate_channel(&self, chanstr: &str, rep: &mut dyn Reporter) -> Option<WifiChannel> {
        match channels::parse(chanstr) {
            Ok(parsed) => {
                for warning in &parsed.warnings {
                    rep.send_message(Severity::Info, warning);
                }
                Some(parsed.channel)
            }
            Err(e) => {
                rep.send_message(Severity::Error, &e.to_string());
                None
            }
        }
    }

    fn set_channel(
        &mut self,
        channel: &WifiChannel,
        seqno: u32,
        rep: &mut dyn Reporter,
    ) -> SetOutcome {
        let result = self.tune(channel);
        let mut failures = self.seq_channel_failure;
        let outcome = apply_channel_set_result(&mut failures, seqno, result, channel, rep);
        self.seq_channel_failure = failures;
        outcome
    }

    fn start_capture(&mut self, sink: FrameSink) -> io::Result<JoinHandle<()>> {
        let cap = self
            .pcap
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pcap handle is not open"))?;
        let cap_interface = self.cap_interface.clone().unwrap_or_default();
        let dlt = self.datalink_type;
        capture::spawn(cap, cap_interface, dlt, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingReporter {
        messages: Vec<(Severity, String)>,
        configresps: Vec<(u32, bool, Option<String>)>,
    }

    impl Reporter for RecordingReporter {
        fn send_message(&mut self, severity: Severity, text: &str) {
            self.messages.push((severity, text.to_string()));
        }

        fn send_configresp(
            &mut self,
            seqno: u32,
            success: bool,
            _msg: &str,
            channel: Option<&str>,
        ) {
            self.configresps
                .push((seqno, success, channel.map(str::to_string)));
        }
    }

    #[derive(Default)]
    struct FakeView {
        /// name -> wext mode
        devices: HashMap<String, u32>,
        sibling: Option<String>,
    }

    impl DeviceView for FakeView {
        fn exists(&self, name: &str) -> bool {
            self.devices.contains_key(name)
        }

        fn wireless_mode(&self, name: &str) -> Option<u32> {
            self.devices.get(name).copied()
        }

        fn monitor_sibling(&self, _ignored: &str, _mac: &[u8; 6]) -> Option<String> {
            self.sibling.clone()
        }
    }

    const MAC: [u8; 6] = [0, 1, 2, 3, 4, 5];

    fn tune_err() -> Result<(), NetlinkError> {
        Err(NetlinkError::Rfkill {
            operation: "tune",
            interface: "wlan0".into(),
            reason: "EBUSY".into(),
        })
    }

    #[test]
    fn short_names_get_the_mon_suffix() {
        let view = FakeView::default();
        assert_eq!(
            select_capture_name("wlan0", None, &MAC, &view).unwrap(),
            "wlan0mon"
        );
    }

    #[test]
    fn long_names_fall_back_to_kismon() {
        let view = FakeView::default();
        assert_eq!(
            select_capture_name("verylongwirelessname0", None, &MAC, &view).unwrap(),
            "kismon0"
        );
    }

    #[test]
    fn kismon_skips_taken_indexes() {
        let mut view = FakeView::default();
        view.devices.insert("kismon0".into(), wext::IW_MODE_MONITOR);
        view.devices.insert("kismon1".into(), wext::IW_MODE_INFRA);
        assert_eq!(
            select_capture_name("verylongwirelessname0", None, &MAC, &view).unwrap(),
            "kismon2"
        );
    }

    #[test]
    fn explicit_vif_flag_wins() {
        let mut view = FakeView::default();
        view.sibling = Some("wlan0_mon".into());
        assert_eq!(
            select_capture_name("wlan0", Some("wifimon"), &MAC, &view).unwrap(),
            "wifimon"
        );
    }

    #[test]
    fn monitor_sibling_is_reused() {
        let mut view = FakeView::default();
        view.sibling = Some("wlan0_mon".into());
        assert_eq!(
            select_capture_name("wlan0", None, &MAC, &view).unwrap(),
            "wlan0_mon"
        );
    }

    #[test]
    fn existing_non_monitor_mon_interface_aborts() {
        let mut view = FakeView::default();
        view.devices.insert("wlan0mon".into(), wext::IW_MODE_INFRA);
        let err = select_capture_name("wlan0", None, &MAC, &view).unwrap_err();
        assert!(err.contains("isn't in monitor mode"));
    }

    #[test]
    fn name_boundary_sits_at_ifnamsiz_minus_suffix() {
        let view = FakeView::default();
        // 12 chars + "mon" = 15, the longest name that still fits.
        assert_eq!(
            select_capture_name("abcdefghijkl", None, &MAC, &view).unwrap(),
            "abcdefghijklmon"
        );
        // 13 chars would need 16; falls back to kismon.
        assert_eq!(
            select_capture_name("abcdefghijklm", None, &MAC, &view).unwrap(),
            "kismon0"
        );
    }

    #[test]
    fn hopping_tolerates_ten_failures_then_recovers() {
        let mut rep = RecordingReporter::default();
        let mut failures = 0;
        let channel = channels::parse("6").unwrap().channel;

        for _ in 0..10 {
            let outcome = apply_channel_set_result(&mut failures, 0, tune_err(), &channel, &mut rep);
            assert_eq!(outcome, SetOutcome::Tolerated);
        }
        assert_eq!(failures, 10);
        assert_eq!(rep.messages.len(), 10);
        assert!(rep
            .messages
            .iter()
            .all(|(sev, text)| *sev == Severity::Error && text.contains("ignoring error")));

        // The eleventh attempt succeeds; the streak resets.
        let outcome = apply_channel_set_result(&mut failures, 0, Ok(()), &channel, &mut rep);
        assert_eq!(outcome, SetOutcome::Ok);
        assert_eq!(failures, 0);
        // Hop-time success does not emit a configure response.
        assert!(rep.configresps.is_empty());
    }

    #[test]
    fn hopping_escalates_on_the_eleventh_failure() {
        let mut rep = RecordingReporter::default();
        let mut failures = 0;
        let channel = channels::parse("6").unwrap().channel;

        for _ in 0..10 {
            apply_channel_set_result(&mut failures, 0, tune_err(), &channel, &mut rep);
        }
        let outcome = apply_channel_set_result(&mut failures, 0, tune_err(), &channel, &mut rep);
        assert!(matches!(outcome, SetOutcome::Fatal(_)));
    }

    #[test]
    fn explicit_set_fails_immediately() {
        let mut rep = RecordingReporter::default();
        let mut failures = 0;
        let channel = channels::parse("6").unwrap().channel;

        let outcome = apply_channel_set_result(&mut failures, 42, tune_err(), &channel, &mut rep);
        match outcome {
            SetOutcome::Fatal(msg) => assert!(msg.contains("failed to set channel 6")),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert_eq!(failures, 0);
    }

    #[test]
    fn explicit_set_success_sends_configresp_with_rendered_channel() {
        let mut rep = RecordingReporter::default();
        let mut failures = 0;
        let channel = channels::parse("36VHT80").unwrap().channel;

        let outcome = apply_channel_set_result(&mut failures, 42, Ok(()), &channel, &mut rep);
        assert_eq!(outcome, SetOutcome::Ok);
        assert_eq!(
            rep.configresps,
            vec![(42, true, Some(channels::render(&channel)))]
        );
    }

    #[test]
    fn control_freq_mapping() {
        assert_eq!(control_mhz(6), 2437);
        assert_eq!(control_mhz(5180), 5180);
        // Unknown channel numbers go through untouched for the driver.
        assert_eq!(control_mhz(999), 999);
    }
}
