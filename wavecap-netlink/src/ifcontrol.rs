//! Plain interface control: flags, link state, addresses, enumeration.
//!
//! Flag manipulation goes through SIOCGIFFLAGS/SIOCSIFFLAGS on an AF_INET
//! control socket; identity data (MAC, ifindex) comes from sysfs, which is
//! stable across every driver generation we care about.

use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use crate::error::{NetlinkError, Result};

const IFNAMSIZ: usize = libc::IFNAMSIZ;

/// ifreq with the flags arm of the request union. The union is 24 bytes on
/// 64-bit; the explicit pad keeps the kernel from reading past our stack.
#[repr(C)]
struct IfReqFlags {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
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

pub(crate) fn control_socket() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Current IFF_* flags of an interface.
pub fn interface_flags(interface: &str) -> Result<u32> {
    let sock = control_socket().map_err(|e| NetlinkError::IfControl {
        operation: "open control socket for",
        interface: interface.to_string(),
        source: e,
    })?;

    let mut req = IfReqFlags {
        ifr_name: ifname_bytes(interface)?,
        ifr_flags: 0,
        _pad: [0; 22],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS, &mut req) };
    if rc < 0 {
        return Err(NetlinkError::IfControl {
            operation: "read flags of",
            interface: interface.to_string(),
            source: io::Error::last_os_error(),
        });
    }

    Ok(req.ifr_flags as u16 as u32)
}

fn set_interface_flags(interface: &str, flags: u32) -> Result<()> {
    let sock = control_socket().map_err(|e| NetlinkError::IfControl {
        operation: "open control socket for",
        interface: interface.to_string(),
        source: e,
    })?;

    let mut req = IfReqFlags {
        ifr_name: ifname_bytes(interface)?,
        ifr_flags: flags as u16 as libc::c_short,
        _pad: [0; 22],
    };

    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS, &mut req) };
    if rc < 0 {
        return Err(NetlinkError::IfControl {
            operation: "set flags of",
            interface: interface.to_string(),
            source: io::Error::last_os_error(),
        });
    }

    Ok(())
}

/// Bring an interface up (IFF_UP).
pub fn interface_up(interface: &str) -> Result<()> {
    let flags = interface_flags(interface)?;
    if flags & libc::IFF_UP as u32 != 0 {
        return Ok(());
    }
    tracing::debug!(interface, "bringing interface up");
    set_interface_flags(interface, flags | libc::IFF_UP as u32)
}

/// Take an interface down.
pub fn interface_down(interface: &str) -> Result<()> {
    let flags = interface_flags(interface)?;
    if flags & libc::IFF_UP as u32 == 0 {
        return Ok(());
    }
    tracing::debug!(interface, "bringing interface down");
    set_interface_flags(interface, flags & !(libc::IFF_UP as u32))
}

/// MAC address from sysfs.
pub fn hardware_address(interface: &str) -> Result<[u8; 6]> {
    let path = format!("/sys/class/net/{interface}/address");
    let content = fs::read_to_string(&path).map_err(|e| NetlinkError::SysfsRead {
        what: "hardware address",
        interface: interface.to_string(),
        reason: e.to_string(),
    })?;

    let mut mac = [0u8; 6];
    let mut octets = content.trim().split(':');
    for slot in mac.iter_mut() {
        let octet = octets.next().ok_or_else(|| NetlinkError::SysfsRead {
            what: "hardware address",
            interface: interface.to_string(),
            reason: format!("malformed address '{}'", content.trim()),
        })?;
        *slot = u8::from_str_radix(octet, 16).map_err(|_| NetlinkError::SysfsRead {
            what: "hardware address",
            interface: interface.to_string(),
            reason: format!("malformed octet '{octet}'"),
        })?;
    }

    Ok(mac)
}

/// Kernel interface index from sysfs.
pub fn ifindex(interface: &str) -> Result<u32> {
    let path = format!("/sys/class/net/{interface}/ifindex");
    let content = fs::read_to_string(&path).map_err(|_| NetlinkError::InterfaceNotFound {
        name: interface.to_string(),
    })?;
    content
        .trim()
        .parse()
        .map_err(|e| NetlinkError::SysfsRead {
            what: "ifindex",
            interface: interface.to_string(),
            reason: format!("{e}"),
        })
}

/// True iff the kernel currently knows an interface by this name.
pub fn interface_exists(interface: &str) -> bool {
    let Ok(name) = ifname_bytes(interface) else {
        return false;
    };
    unsafe { libc::if_nametoindex(name.as_ptr() as *const libc::c_char) != 0 }
}

/// True iff the interface is wireless (exposes a wireless sysfs node).
pub fn is_wireless_interface(interface: &str) -> bool {
    Path::new(&format!("/sys/class/net/{interface}/wireless")).exists()
}

/// All interface names known to the kernel.
pub fn list_interfaces() -> Result<Vec<String>> {
    let entries = fs::read_dir("/sys/class/net")
        .map_err(|e| NetlinkError::io("reading /sys/class/net", e))?;

    let mut names = Vec::new();
    for entry in entries.flatten() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_visible() {
        assert!(interface_exists("lo"));
        assert!(!interface_exists("definitely-not-a-real-interface"));
        assert!(list_interfaces().unwrap().iter().any(|n| n == "lo"));
    }

    #[test]
    fn loopback_is_not_wireless() {
        assert!(!is_wireless_interface("lo"));
    }

    #[test]
    fn overlong_names_are_rejected() {
        assert!(ifname_bytes("a-name-well-past-ifnamsiz-limit").is_err());
        assert!(ifname_bytes("").is_err());
    }
}
