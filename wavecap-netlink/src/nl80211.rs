//! nl80211 control plane over generic netlink.
//!
//! [`Nl80211Socket`] bundles the netlink socket and the resolved nl80211
//! family id into one resource: they are acquired together at connect and
//! released together on drop, so a helper that falls back to the ioctl plane
//! can prove to itself that no netlink path remains reachable.

use neli::{
    consts::{nl::*, socket::*},
    genl::{Genlmsghdr, Nlattr},
    nl::{NlPayload, Nlmsghdr},
    socket::NlSocketHandle,
};

use crate::error::{NetlinkError, Result};
use crate::ifcontrol;

const NL80211_GENL_NAME: &str = "nl80211";

const NL80211_CMD_GET_WIPHY: u8 = 1;
const NL80211_CMD_NEW_INTERFACE: u8 = 7;
const NL80211_CMD_SET_CHANNEL: u8 = 65;

const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_IFNAME: u16 = 4;
const NL80211_ATTR_IFTYPE: u16 = 5;
const NL80211_ATTR_WIPHY_BANDS: u16 = 22;
const NL80211_ATTR_MNTR_FLAGS: u16 = 23;
const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
const NL80211_ATTR_WIPHY_CHANNEL_TYPE: u16 = 39;
const NL80211_ATTR_CHANNEL_WIDTH: u16 = 159;
const NL80211_ATTR_CENTER_FREQ1: u16 = 160;
const NL80211_ATTR_CENTER_FREQ2: u16 = 161;

const NL80211_IFTYPE_MONITOR: u32 = 6;

const NL80211_BAND_ATTR_FREQS: u16 = 1;
const NL80211_FREQUENCY_ATTR_FREQ: u16 = 1;
const NL80211_FREQUENCY_ATTR_DISABLED: u16 = 2;

const NL80211_CHAN_NO_HT: u32 = 0;
const NL80211_CHAN_HT40MINUS: u32 = 2;
const NL80211_CHAN_HT40PLUS: u32 = 3;

const NL80211_CHAN_WIDTH_80: u32 = 3;
const NL80211_CHAN_WIDTH_160: u32 = 5;
const NL80211_CHAN_WIDTH_5: u32 = 6;
const NL80211_CHAN_WIDTH_10: u32 = 7;

/// HT channel flavour for plain set-channel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtMode {
    NoHt,
    Ht40Minus,
    Ht40Plus,
}

impl HtMode {
    fn to_nl80211(self) -> u32 {
        match self {
            Self::NoHt => NL80211_CHAN_NO_HT,
            Self::Ht40Minus => NL80211_CHAN_HT40MINUS,
            Self::Ht40Plus => NL80211_CHAN_HT40PLUS,
        }
    }
}

/// Explicit channel width for set-frequency requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W5,
    W10,
    W80,
    W160,
}

impl Width {
    fn to_nl80211(self) -> u32 {
        match self {
            Self::W5 => NL80211_CHAN_WIDTH_5,
            Self::W10 => NL80211_CHAN_WIDTH_10,
            Self::W80 => NL80211_CHAN_WIDTH_80,
            Self::W160 => NL80211_CHAN_WIDTH_160,
        }
    }
}

/// Monitor-vif behaviour flags (NL80211_MNTR_FLAG_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorFlag {
    FcsFail,
    PlcpFail,
    Control,
    OtherBss,
}

impl MonitorFlag {
    fn to_nl80211(self) -> u16 {
        match self {
            Self::FcsFail => 1,
            Self::PlcpFail => 2,
            Self::Control => 3,
            Self::OtherBss => 4,
        }
    }
}

/// A connected nl80211 channel: socket plus resolved family id.
pub struct Nl80211Socket {
    socket: NlSocketHandle,
    family_id: u16,
}

impl Nl80211Socket {
    /// Connect to generic netlink and resolve the nl80211 family.
    ///
    /// Failure usually means no wireless drivers are loaded, or the process
    /// lacks CAP_NET_ADMIN.
    pub fn connect() -> Result<Self> {
        let mut socket = NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(|e| {
            NetlinkError::Nl80211Connect(format!("failed to create netlink socket: {e}"))
        })?;

        let family_id = socket.resolve_genl_family(NL80211_GENL_NAME).map_err(|e| {
            NetlinkError::Nl80211Connect(format!(
                "failed to resolve nl80211 family (wireless drivers not loaded?): {e}"
            ))
        })?;

        Ok(Self { socket, family_id })
    }

    fn attr(
        operation: &'static str,
        interface: &str,
        nla_type: u16,
        payload: impl neli::ToBytes + neli::Size,
    ) -> Result<Nlattr<u16, neli::types::Buffer>> {
        Nlattr::new(false, false, nla_type, payload).map_err(|e| NetlinkError::Nl80211Operation {
            operation,
            interface: interface.to_string(),
            reason: format!("failed to build attribute {nla_type}: {e}"),
        })
    }

    fn execute(
        &mut self,
        operation: &'static str,
        interface: &str,
        cmd: u8,
        attrs: Vec<Nlattr<u16, neli::types::Buffer>>,
    ) -> Result<()> {
        let genlhdr = Genlmsghdr::new(cmd, 1, attrs.into_iter().collect());
        let nlhdr = Nlmsghdr::new(
            None,
            self.family_id,
            NlmFFlags::new(&[NlmF::Request, NlmF::Ack]),
            None,
            None,
            NlPayload::Payload(genlhdr),
        );

        self.socket
            .send(nlhdr)
            .map_err(|e| NetlinkError::Nl80211Operation {
                operation,
                interface: interface.to_string(),
                reason: format!("send failed: {e}"),
            })?;

        // Kernel refusals (EBUSY, EOPNOTSUPP, regdomain rejections) surface
        // here as netlink error messages.
        match self.socket.recv::<u16, Genlmsghdr<u8, u16>>() {
            Ok(_) => Ok(()),
            Err(e) => Err(NetlinkError::Nl80211Operation {
                operation,
                interface: interface.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Create a monitor-mode virtual interface on the phy backing `parent`.
    pub fn create_monitor_vif(
        &mut self,
        parent: &str,
        name: &str,
        flags: &[MonitorFlag],
    ) -> Result<()> {
        const OP: &str = "create monitor vif";
        let parent_index = ifcontrol::ifindex(parent)?;

        let mut ifname = name.as_bytes().to_vec();
        ifname.push(0);

        let attrs = vec![
            Self::attr(OP, parent, NL80211_ATTR_IFINDEX, parent_index)?,
            Self::attr(OP, parent, NL80211_ATTR_IFNAME, ifname)?,
            Self::attr(OP, parent, NL80211_ATTR_IFTYPE, NL80211_IFTYPE_MONITOR)?,
            Self::attr(OP, parent, NL80211_ATTR_MNTR_FLAGS, encode_monitor_flags(flags))?,
        ];

        self.execute(OP, parent, NL80211_CMD_NEW_INTERFACE, attrs)?;
        tracing::info!(parent, vif = name, "created monitor vif");
        Ok(())
    }

    /// Tune a 20/40 MHz channel, carrying the HT40 sideness flag.
    pub fn set_channel(&mut self, interface: &str, control_freq: u32, ht: HtMode) -> Result<()> {
        const OP: &str = "set channel";
        let index = ifcontrol::ifindex(interface)?;

        let attrs = vec![
            Self::attr(OP, interface, NL80211_ATTR_IFINDEX, index)?,
            Self::attr(OP, interface, NL80211_ATTR_WIPHY_FREQ, control_freq)?,
            Self::attr(OP, interface, NL80211_ATTR_WIPHY_CHANNEL_TYPE, ht.to_nl80211())?,
        ];

        self.execute(OP, interface, NL80211_CMD_SET_CHANNEL, attrs)
    }

    /// Tune with an explicit width and center frequencies. Centers of 0 are
    /// omitted from the request.
    pub fn set_frequency(
        &mut self,
        interface: &str,
        control_freq: u32,
        width: Width,
        center_freq1: u32,
        center_freq2: u32,
    ) -> Result<()> {
        const OP: &str = "set frequency";
        let index = ifcontrol::ifindex(interface)?;

        let mut attrs = vec![
            Self::attr(OP, interface, NL80211_ATTR_IFINDEX, index)?,
            Self::attr(OP, interface, NL80211_ATTR_WIPHY_FREQ, control_freq)?,
            Self::attr(OP, interface, NL80211_ATTR_CHANNEL_WIDTH, width.to_nl80211())?,
        ];
        if center_freq1 != 0 {
            attrs.push(Self::attr(OP, interface, NL80211_ATTR_CENTER_FREQ1, center_freq1)?);
        }
        if center_freq2 != 0 {
            attrs.push(Self::attr(OP, interface, NL80211_ATTR_CENTER_FREQ2, center_freq2)?);
        }

        self.execute(OP, interface, NL80211_CMD_SET_CHANNEL, attrs)
    }

    /// Enabled frequencies (MHz) across all bands of the phy backing
    /// `interface`.
    pub fn channel_frequencies(&mut self, interface: &str) -> Result<Vec<u32>> {
        const OP: &str = "get channel list";
        let index = ifcontrol::ifindex(interface)?;

        let attrs = vec![Self::attr(OP, interface, NL80211_ATTR_IFINDEX, index)?];
        let genlhdr = Genlmsghdr::new(
            NL80211_CMD_GET_WIPHY,
            1,
            attrs.into_iter().collect(),
        );
        let nlhdr = Nlmsghdr::new(
            None,
            self.family_id,
            NlmFFlags::new(&[NlmF::Request, NlmF::Dump]),
            None,
            None,
            NlPayload::Payload(genlhdr),
        );

        self.socket
            .send(nlhdr)
            .map_err(|e| NetlinkError::Nl80211Operation {
                operation: OP,
                interface: interface.to_string(),
                reason: format!("send failed: {e}"),
            })?;

        let mut freqs = Vec::new();
        loop {
            let response = self
                .socket
                .recv::<u16, Genlmsghdr<u8, u16>>()
                .map_err(|e| NetlinkError::Nl80211Operation {
                    operation: OP,
                    interface: interface.to_string(),
                    reason: e.to_string(),
                })?;

            let Some(response) = response else { break };
            if response.nl_type == u16::from(Nlmsg::Done) {
                break;
            }

            if let NlPayload::Payload(genlhdr) = response.nl_payload {
                for attr in genlhdr.get_attr_handle().iter() {
                    if attr.nla_type.nla_type == NL80211_ATTR_WIPHY_BANDS {
                        collect_band_frequencies(attr.nla_payload.as_ref(), &mut freqs);
                    }
                }
            }
        }

        freqs.sort_unstable();
        freqs.dedup();
        Ok(freqs)
    }
}

/// Nested MNTR_FLAGS payload: one empty flag attribute per monitor flag.
fn encode_monitor_flags(flags: &[MonitorFlag]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(flags.len() * 4);
    for flag in flags {
        payload.extend_from_slice(&4u16.to_ne_bytes());
        payload.extend_from_slice(&flag.to_nl80211().to_ne_bytes());
    }
    payload
}

/// Walk one level of netlink attributes in a raw payload.
fn walk_attrs(bytes: &[u8], mut visit: impl FnMut(u16, &[u8])) {
    let mut rest = bytes;
    while rest.len() >= 4 {
        let len = u16::from_ne_bytes([rest[0], rest[1]]) as usize;
        let nla_type = u16::from_ne_bytes([rest[2], rest[3]]) & 0x3fff;
        if len < 4 || len > rest.len() {
            break;
        }
        visit(nla_type, &rest[4..len]);
        let aligned = (len + 3) & !3;
        if aligned >= rest.len() {
            break;
        }
        rest = &rest[aligned..];
    }
}

/// Pull every enabled frequency out of a WIPHY_BANDS payload:
/// bands -> band attrs -> FREQS -> per-frequency attrs.
fn collect_band_frequencies(bands: &[u8], out: &mut Vec<u32>) {
    walk_attrs(bands, |_band_index, band| {
        walk_attrs(band, |band_attr, freqs| {
            if band_attr != NL80211_BAND_ATTR_FREQS {
                return;
            }
            walk_attrs(freqs, |_freq_index, freq_attrs| {
                let mut mhz = None;
                let mut disabled = false;
                walk_attrs(freq_attrs, |attr, value| match attr {
                    NL80211_FREQUENCY_ATTR_FREQ if value.len() >= 4 => {
                        mhz = Some(u32::from_ne_bytes([value[0], value[1], value[2], value[3]]));
                    }
                    NL80211_FREQUENCY_ATTR_DISABLED => disabled = true,
                    _ => {}
                });
                if let Some(mhz) = mhz {
                    if !disabled {
                        out.push(mhz);
                    }
                }
            });
        });
    });
}
