//! Channel string grammar and validation.
//!
//! Channel strings name a control channel (by number or MHz) plus an
//! optional width suffix:
//!
//! ```text
//! XX          20 MHz channel
//! XXW5        5 MHz channel (mac80211 only)
//! XXW10       10 MHz channel (mac80211 only)
//! XXHT40+     40 MHz, secondary above
//! XXHT40-     40 MHz, secondary below
//! XXVHT80     80 MHz, center derived from the PHY table
//! XXVHT160    160 MHz, center derived from the PHY table
//! XXVHT80-YY  80 MHz with an explicit center frequency
//! XXVHT160-YY 160 MHz with an explicit center frequency
//! ```
//!
//! HT40± is matched first since it shares the numeric prefix with every
//! other form. A bad HT40 side or an unknown suffix degrades to a basic
//! 20 MHz channel with a warning; an 80/160 MHz request on a channel the
//! PHY table rules out is the one hard parse failure.

use crate::phy_table::{self, CHAN_HT40MINUS, CHAN_HT40PLUS, CHAN_VHT160, CHAN_VHT80};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HtMode {
    #[default]
    NoHt,
    Ht40Minus,
    Ht40Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelWidth {
    #[default]
    Default20,
    W5,
    W10,
    Vht80,
    Vht160,
}

/// A parsed channel, ready for either control plane.
///
/// Exactly one of `ht != NoHt` or `width != Default20` holds for non-basic
/// channels. `center_freq2` is reserved for 80+80 operation and always 0
/// today. `unusual_center1` records that the center was supplied explicitly
/// rather than derived; it only affects rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WifiChannel {
    pub control_freq: u32,
    pub ht: HtMode,
    pub width: ChannelWidth,
    pub center_freq1: u32,
    pub center_freq2: u32,
    pub unusual_center1: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("unable to parse any channel information from channel string '{0}'")]
    Unparseable(String),

    #[error(
        "requested channel {chan} as a {width} channel; this does not appear to be \
         a valid channel for {mhz}MHz operation, skipping channel"
    )]
    InvalidWidth {
        chan: u32,
        width: &'static str,
        mhz: u32,
    },
}

/// Successful parse: the channel plus any informational warnings to relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub channel: WifiChannel,
    pub warnings: Vec<String>,
}

impl Parsed {
    fn clean(channel: WifiChannel) -> Self {
        Self {
            channel,
            warnings: Vec::new(),
        }
    }
}

fn split_leading_number(s: &str) -> Option<(u32, &str)> {
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let value: u32 = s[..digits].parse().ok()?;
    Some((value, &s[digits..]))
}

pub fn parse(chanstr: &str) -> Result<Parsed, ChannelError> {
    let chanstr = chanstr.trim();
    let Some((number, suffix)) = split_leading_number(chanstr) else {
        return Err(ChannelError::Unparseable(chanstr.to_string()));
    };

    // HT40+ / HT40- first; they share the number prefix with everything else.
    if let Some(side) = suffix.strip_prefix("HT40") {
        let mut channel = WifiChannel {
            control_freq: number,
            ..Default::default()
        };
        let mut warnings = Vec::new();

        // Only the side marker counts; anything after it is ignored.
        match side.chars().next() {
            Some('-') => {
                channel.ht = HtMode::Ht40Minus;
                warn_if_ht40_invalid(number, CHAN_HT40MINUS, "HT40-", &mut warnings);
            }
            Some('+') => {
                channel.ht = HtMode::Ht40Plus;
                warn_if_ht40_invalid(number, CHAN_HT40PLUS, "HT40+", &mut warnings);
            }
            _ => {
                // Unknown side marker; fall back to a basic channel.
                warnings.push(format!(
                    "unable to parse attributes on channel '{chanstr}', \
                     treating as standard non-HT channel"
                ));
                channel.ht = HtMode::NoHt;
            }
        }

        return Ok(Parsed { channel, warnings });
    }

    if suffix.is_empty() {
        return Ok(Parsed::clean(WifiChannel {
            control_freq: number,
            ..Default::default()
        }));
    }

    let (kind, explicit_center) = match suffix.split_once('-') {
        Some((kind, center)) => (kind, center.parse::<u32>().ok()),
        None => (suffix, None),
    };

    let mut channel = WifiChannel {
        control_freq: number,
        ..Default::default()
    };

    if kind.eq_ignore_ascii_case("w5") {
        channel.width = ChannelWidth::W5;
    } else if kind.eq_ignore_ascii_case("w10") {
        channel.width = ChannelWidth::W10;
    } else if kind.eq_ignore_ascii_case("vht80") {
        channel.width = ChannelWidth::Vht80;
        resolve_vht_center(&mut channel, number, explicit_center, CHAN_VHT80, "VHT80", 80)?;
    } else if kind.eq_ignore_ascii_case("vht160") {
        channel.width = ChannelWidth::Vht160;
        resolve_vht_center(&mut channel, number, explicit_center, CHAN_VHT160, "VHT160", 160)?;
    } else {
        return Ok(Parsed {
            channel: WifiChannel {
                control_freq: number,
                ..Default::default()
            },
            warnings: vec![format!(
                "unable to parse attributes on channel '{chanstr}', \
                 treating as standard non-HT channel"
            )],
        });
    }

    Ok(Parsed::clean(channel))
}

fn warn_if_ht40_invalid(number: u32, flag: u32, label: &str, warnings: &mut Vec<String>) {
    if let Some(entry) = phy_table::lookup(number) {
        if entry.flags & flag == 0 {
            warnings.push(format!(
                "requested channel {number} as a {label} channel; this does not \
                 appear to be a valid channel for 40MHz operation"
            ));
        }
    }
}

fn resolve_vht_center(
    channel: &mut WifiChannel,
    number: u32,
    explicit_center: Option<u32>,
    flag: u32,
    label: &'static str,
    mhz: u32,
) -> Result<(), ChannelError> {
    if let Some(center) = explicit_center {
        // Caller pinned the segment center; take it verbatim.
        channel.center_freq1 = center;
        channel.unusual_center1 = true;
        return Ok(());
    }

    if let Some(entry) = phy_table::lookup(number) {
        if entry.flags & flag == 0 {
            return Err(ChannelError::InvalidWidth {
                chan: number,
                width: label,
                mhz,
            });
        }
        channel.control_freq = entry.freq;
        channel.center_freq1 = if mhz == 80 {
            entry.freq80
        } else {
            entry.freq160
        };
    }
    // Unknown channels pass through with no center; the driver gets to
    // decide whether it can tune them.
    Ok(())
}

/// Inverse of [`parse`]; a derived center renders back to the short form.
pub fn render(channel: &WifiChannel) -> String {
    if channel.ht == HtMode::NoHt && channel.width == ChannelWidth::Default20 {
        return channel.control_freq.to_string();
    }

    match channel.ht {
        HtMode::Ht40Minus => return format!("{}HT40-", channel.control_freq),
        HtMode::Ht40Plus => return format!("{}HT40+", channel.control_freq),
        HtMode::NoHt => {}
    }

    match channel.width {
        ChannelWidth::W5 => format!("{}W5", channel.control_freq),
        ChannelWidth::W10 => format!("{}W10", channel.control_freq),
        ChannelWidth::Vht80 if channel.unusual_center1 => {
            format!("{}VHT80-{}", channel.control_freq, channel.center_freq1)
        }
        ChannelWidth::Vht80 => format!("{}VHT80", channel.control_freq),
        ChannelWidth::Vht160 if channel.unusual_center1 => {
            format!("{}VHT160-{}", channel.control_freq, channel.center_freq1)
        }
        ChannelWidth::Vht160 => format!("{}VHT160", channel.control_freq),
        ChannelWidth::Default20 => channel.control_freq.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(s: &str) -> WifiChannel {
        parse(s).unwrap().channel
    }

    #[test]
    fn basic_channel() {
        let ch = parse_ok("6");
        assert_eq!(ch.control_freq, 6);
        assert_eq!(ch.ht, HtMode::NoHt);
        assert_eq!(ch.width, ChannelWidth::Default20);
        assert_eq!(render(&ch), "6");
    }

    #[test]
    fn ht40_round_trips() {
        for s in ["6HT40+", "6HT40-", "5180HT40+"] {
            let parsed = parse(s).unwrap();
            assert_eq!(render(&parsed.channel), s);
        }
    }

    #[test]
    fn valid_ht40_produces_no_warning() {
        let parsed = parse("6HT40+").unwrap();
        assert_eq!(parsed.channel.ht, HtMode::Ht40Plus);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn invalid_ht40_side_warns_but_keeps_the_channel() {
        // Channel 13's secondary would land above the band edge.
        let parsed = parse("13HT40+").unwrap();
        assert_eq!(parsed.channel.ht, HtMode::Ht40Plus);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("40MHz"));
        assert_eq!(render(&parsed.channel), "13HT40+");
    }

    #[test]
    fn vht80_derives_center_from_table() {
        let ch = parse_ok("36VHT80");
        assert_eq!(ch.width, ChannelWidth::Vht80);
        // Control frequency is canonicalized to MHz on the derived path.
        assert_eq!(ch.control_freq, 5180);
        assert_eq!(ch.center_freq1, 5210);
        assert!(!ch.unusual_center1);
        assert_eq!(render(&ch), "5180VHT80");
    }

    #[test]
    fn vht80_accepts_frequency_spelling() {
        assert_eq!(parse_ok("5180VHT80"), parse_ok("36VHT80"));
    }

    #[test]
    fn vht160_on_a_non_160_channel_is_rejected() {
        let err = parse("149VHT160").unwrap_err();
        assert!(matches!(
            err,
            ChannelError::InvalidWidth {
                chan: 149,
                width: "VHT160",
                ..
            }
        ));
    }

    #[test]
    fn vht80_on_a_non_vht_channel_is_rejected() {
        assert!(parse("165VHT80").is_err());
    }

    #[test]
    fn explicit_center_is_kept_verbatim() {
        let parsed = parse("36VHT80-5250").unwrap();
        let ch = parsed.channel;
        assert_eq!(ch.control_freq, 36);
        assert_eq!(ch.center_freq1, 5250);
        assert!(ch.unusual_center1);
        assert_eq!(render(&ch), "36VHT80-5250");
    }

    #[test]
    fn sub_20mhz_widths() {
        let ch = parse_ok("6W5");
        assert_eq!(ch.width, ChannelWidth::W5);
        assert_eq!(ch.center_freq1, 0);
        assert_eq!(render(&ch), "6W5");

        let ch = parse_ok("5200w10");
        assert_eq!(ch.width, ChannelWidth::W10);
        assert_eq!(render(&ch), "5200W10");
    }

    #[test]
    fn unknown_suffix_degrades_to_basic() {
        let parsed = parse("6FOO").unwrap();
        assert_eq!(parsed.channel.width, ChannelWidth::Default20);
        assert_eq!(parsed.channel.ht, HtMode::NoHt);
        assert_eq!(parsed.channel.control_freq, 6);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn bad_ht40_side_degrades_to_basic() {
        let parsed = parse("6HT40x").unwrap();
        assert_eq!(parsed.channel.ht, HtMode::NoHt);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn garbage_is_unparseable() {
        assert!(parse("HT40+").is_err());
        assert!(parse("").is_err());
        assert!(parse("mhz").is_err());
    }

    #[test]
    fn round_trip_is_stable_for_every_grammar_form() {
        for s in [
            "1", "11", "2484", "6HT40+", "9HT40-", "6W5", "6W10", "5180VHT80", "5500VHT160",
            "36VHT80-5250", "100VHT160-5570",
        ] {
            let once = parse(s).unwrap().channel;
            let again = parse(&render(&once)).unwrap().channel;
            assert_eq!(once, again, "round trip diverged for '{s}'");
        }
    }
}
