//! Legacy wireless-extensions ioctl plane.
//!
//! Old drivers (and a few stubborn new ones) only speak SIOCSIWFREQ and
//! friends. The kernel ABI structs are reproduced here verbatim from
//! linux/wireless.h (WE v22); every struct handed to an ioctl is padded to
//! the full `struct iwreq` size so the kernel never reads past our stack.

use std::io;
use std::os::fd::AsRawFd;

use crate::error::{NetlinkError, Result};
use crate::ifcontrol;

const IFNAMSIZ: usize = libc::IFNAMSIZ;

const SIOCSIWFREQ: libc::c_ulong = 0x8B04;
const SIOCGIWFREQ: libc::c_ulong = 0x8B05;
const SIOCSIWMODE: libc::c_ulong = 0x8B06;
const SIOCGIWMODE: libc::c_ulong = 0x8B07;
const SIOCGIWRANGE: libc::c_ulong = 0x8B0B;

pub const IW_MODE_AUTO: u32 = 0;
pub const IW_MODE_ADHOC: u32 = 1;
pub const IW_MODE_INFRA: u32 = 2;
pub const IW_MODE_MASTER: u32 = 3;
pub const IW_MODE_REPEAT: u32 = 4;
pub const IW_MODE_SECOND: u32 = 5;
pub const IW_MODE_MONITOR: u32 = 6;

const IW_MAX_BITRATES: usize = 32;
const IW_MAX_ENCODING_SIZES: usize = 8;
const IW_MAX_TXPOWER: usize = 8;
const IW_MAX_FREQUENCIES: usize = 32;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IwFreq {
    m: i32,
    e: i16,
    i: u8,
    flags: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IwQuality {
    qual: u8,
    level: u8,
    noise: u8,
    updated: u8,
}

#[repr(C)]
struct IwReqMode {
    ifr_name: [u8; IFNAMSIZ],
    mode: u32,
    _pad: [u8; 12],
}

#[repr(C)]
struct IwReqFreq {
    ifr_name: [u8; IFNAMSIZ],
    freq: IwFreq,
    _pad: [u8; 8],
}

#[repr(C)]
struct IwPoint {
    pointer: *mut libc::c_void,
    length: u16,
    flags: u16,
}

#[repr(C)]
struct IwReqPoint {
    ifr_name: [u8; IFNAMSIZ],
    data: IwPoint,
}

/// struct iw_range, WE v22. Only the frequency table is interpreted; the
/// rest exists so offsets line up with the kernel's copy_to_user.
#[repr(C)]
struct IwRange {
    throughput: u32,
    min_nwid: u32,
    max_nwid: u32,
    old_num_channels: u16,
    old_num_frequency: u8,
    scan_capa: u8,
    event_capa: [u32; 6],
    sensitivity: i32,
    max_qual: IwQuality,
    avg_qual: IwQuality,
    num_bitrates: u8,
    bitrate: [i32; IW_MAX_BITRATES],
    min_rts: i32,
    max_rts: i32,
    min_frag: i32,
    max_frag: i32,
    min_pmp: i32,
    max_pmp: i32,
    min_pmt: i32,
    max_pmt: i32,
    pmp_flags: u16,
    pmt_flags: u16,
    pm_capa: u16,
    encoding_size: [u16; IW_MAX_ENCODING_SIZES],
    num_encoding_sizes: u8,
    max_encoding_tokens: u8,
    encoding_login_index: u8,
    txpower_capa: u16,
    num_txpower: u8,
    txpower: [i32; IW_MAX_TXPOWER],
    we_version_compiled: u8,
    we_version_source: u8,
    retry_capa: u16,
    retry_flags: u16,
    r_time_flags: u16,
    min_retry: i32,
    max_retry: i32,
    min_r_time: i32,
    max_r_time: i32,
    num_channels: u16,
    num_frequency: u8,
    freq: [IwFreq; IW_MAX_FREQUENCIES],
    enc_capa: u32,
}

fn ifname_bytes(interface: &str) -> Result<[u8; IFNAMSIZ]> {
    let bytes = interface.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ {
        return Err(NetlinkError::InterfaceNotFound {
            name: interface.to_string(),
        });
    }
    let mut name = [0u8; IFNAMSIZ];
    name[..bytes.len()].copy_from_slice(bytes);
    Ok(name)
}

fn wext_error(ioctl: &'static str, interface: &str) -> NetlinkError {
    NetlinkError::WextIoctl {
        ioctl,
        interface: interface.to_string(),
        source: io::Error::last_os_error(),
    }
}

/// Current wireless-extensions mode (IW_MODE_*). Errors mean the device is
/// not a wireless interface or the driver speaks no wext at all.
pub fn get_mode(interface: &str) -> Result<u32> {
    let sock = ifcontrol::control_socket()
        .map_err(|e| NetlinkError::io("opening wext control socket", e))?;

    let mut req = IwReqMode {
        ifr_name: ifname_bytes(interface)?,
        mode: 0,
        _pad: [0; 12],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCGIWMODE, &mut req) };
    if rc < 0 {
        return Err(wext_error("SIOCGIWMODE", interface));
    }
    Ok(req.mode)
}

/// Switch the wext mode in place. The interface is taken down for the
/// switch and left down; callers own the subsequent bring-up.
pub fn set_mode(interface: &str, mode: u32) -> Result<()> {
    ifcontrol::interface_down(interface)?;

    let sock = ifcontrol::control_socket()
        .map_err(|e| NetlinkError::io("opening wext control socket", e))?;

    let mut req = IwReqMode {
        ifr_name: ifname_bytes(interface)?,
        mode,
        _pad: [0; 12],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCSIWMODE, &mut req) };
    if rc < 0 {
        return Err(wext_error("SIOCSIWMODE", interface));
    }

    tracing::debug!(interface, mode, "wext mode set");
    Ok(())
}

/// Tune via SIOCSIWFREQ. Values up to 1024 are treated as channel numbers,
/// larger values as a frequency in MHz.
pub fn set_channel(interface: &str, channel_or_freq: u32) -> Result<()> {
    let sock = ifcontrol::control_socket()
        .map_err(|e| NetlinkError::io("opening wext control socket", e))?;

    let freq = if channel_or_freq > 1024 {
        IwFreq {
            m: (channel_or_freq as i32) * 100_000,
            e: 1,
            i: 0,
            flags: 0,
        }
    } else {
        IwFreq {
            m: channel_or_freq as i32,
            e: 0,
            i: 0,
            flags: 0,
        }
    };

    let mut req = IwReqFreq {
        ifr_name: ifname_bytes(interface)?,
        freq,
        _pad: [0; 8],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCSIWFREQ, &mut req) };
    if rc < 0 {
        return Err(wext_error("SIOCSIWFREQ", interface));
    }
    Ok(())
}

/// Current channel number, if the driver reports one.
pub fn get_channel(interface: &str) -> Result<u32> {
    let sock = ifcontrol::control_socket()
        .map_err(|e| NetlinkError::io("opening wext control socket", e))?;

    let mut req = IwReqFreq {
        ifr_name: ifname_bytes(interface)?,
        freq: IwFreq::default(),
        _pad: [0; 8],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCGIWFREQ, &mut req) };
    if rc < 0 {
        return Err(wext_error("SIOCGIWFREQ", interface));
    }
    Ok(decode_freq(&req.freq))
}

fn decode_freq(freq: &IwFreq) -> u32 {
    if freq.e == 0 && freq.m <= 1024 {
        freq.m.max(0) as u32
    } else {
        // Mantissa/exponent in Hz, reduced to MHz.
        let hz = (freq.m as i64) * 10_i64.pow(freq.e.max(0) as u32);
        (hz / 1_000_000) as u32
    }
}

/// Channel numbers supported by the driver, via SIOCGIWRANGE.
pub fn channel_list(interface: &str) -> Result<Vec<u32>> {
    let sock = ifcontrol::control_socket()
        .map_err(|e| NetlinkError::io("opening wext control socket", e))?;

    // Some drivers write more than sizeof(iw_range); give them headroom.
    let mut buffer = vec![0u8; std::mem::size_of::<IwRange>() * 2];
    let mut req = IwReqPoint {
        ifr_name: ifname_bytes(interface)?,
        data: IwPoint {
            pointer: buffer.as_mut_ptr() as *mut libc::c_void,
            length: buffer.len() as u16,
            flags: 0,
        },
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCGIWRANGE, &mut req) };
    if rc < 0 {
        return Err(wext_error("SIOCGIWRANGE", interface));
    }

    let range = unsafe { &*(buffer.as_ptr() as *const IwRange) };
    let count = (range.num_frequency as usize).min(IW_MAX_FREQUENCIES);

    let mut channels = Vec::with_capacity(count);
    for entry in &range.freq[..count] {
        let chan = if entry.i != 0 {
            entry.i as u32
        } else {
            decode_freq(entry)
        };
        if chan != 0 && !channels.contains(&chan) {
            channels.push(chan);
        }
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freq_decoding() {
        // Plain channel number.
        assert_eq!(
            decode_freq(&IwFreq {
                m: 11,
                e: 0,
                i: 0,
                flags: 0
            }),
            11
        );
        // 2.437 GHz encoded as mantissa/exponent.
        assert_eq!(
            decode_freq(&IwFreq {
                m: 243_700_000,
                e: 1,
                i: 0,
                flags: 0
            }),
            2437
        );
    }

    #[test]
    fn loopback_has_no_wireless_extensions() {
        assert!(get_mode("lo").is_err());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn kernel_abi_sizes_hold() {
        // struct iwreq is 16 bytes of name plus a 16-byte argument union.
        assert_eq!(std::mem::size_of::<IwReqMode>(), 32);
        assert_eq!(std::mem::size_of::<IwReqFreq>(), 32);
        assert_eq!(std::mem::size_of::<IwReqPoint>(), 32);
        assert_eq!(std::mem::size_of::<IwFreq>(), 8);
    }
}
