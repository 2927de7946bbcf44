//! rfkill state for wireless interfaces, straight from `/dev/rfkill`.
//!
//! The event ABI is fixed at 8 bytes (linux/rfkill.h). The device index for
//! a network interface is found by walking `/sys/class/rfkill` and matching
//! the underlying device paths.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{NetlinkError, Result};

const DEV_RFKILL: &str = "/dev/rfkill";
const SYS_RFKILL: &str = "/sys/class/rfkill";

const RFKILL_OP_ADD: u8 = 0;
const RFKILL_OP_CHANGE: u8 = 2;

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct RfkillEvent {
    idx: u32,
    type_: u8,
    op: u8,
    soft: u8,
    hard: u8,
}

impl RfkillEvent {
    const SIZE: usize = 8;

    fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        RfkillEvent {
            idx: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            type_: bytes[4],
            op: bytes[5],
            soft: bytes[6],
            hard: bytes[7],
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let idx = self.idx.to_ne_bytes();
        [
            idx[0], idx[1], idx[2], idx[3], self.type_, self.op, self.soft, self.hard,
        ]
    }
}

/// Soft/hard block state of one rfkill device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockState {
    pub soft: bool,
    pub hard: bool,
}

fn rfkill_error(operation: &'static str, interface: &str, reason: impl ToString) -> NetlinkError {
    NetlinkError::Rfkill {
        operation,
        interface: interface.to_string(),
        reason: reason.to_string(),
    }
}

/// Map a network interface to its rfkill device index, if it has one.
pub fn find_index(interface: &str) -> Result<Option<u32>> {
    let rfkill_path = Path::new(SYS_RFKILL);
    if !rfkill_path.exists() {
        return Ok(None);
    }

    let iface_dev =
        match fs::canonicalize(Path::new("/sys/class/net").join(interface).join("device")) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
    let entries = match fs::read_dir(rfkill_path) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(idx) = name.strip_prefix("rfkill").and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(rfkill_dev) = fs::canonicalize(path.join("device")) else {
            continue;
        };
        if iface_dev.starts_with(&rfkill_dev) || rfkill_dev.starts_with(&iface_dev) {
            return Ok(Some(idx));
        }
    }

    Ok(None)
}

/// Block state of the rfkill device backing `interface`. `None` when the
/// interface has no rfkill device at all.
pub fn block_state(interface: &str) -> Result<Option<BlockState>> {
    let Some(idx) = find_index(interface)? else {
        return Ok(None);
    };

    let mut file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(DEV_RFKILL)
        .map_err(|e| rfkill_error("open /dev/rfkill for", interface, e))?;

    let mut buffer = [0u8; RfkillEvent::SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(n) if n >= RfkillEvent::SIZE => {
                let event = RfkillEvent::from_bytes(&buffer);
                if event.op == RFKILL_OP_ADD && event.idx == idx {
                    return Ok(Some(BlockState {
                        soft: event.soft != 0,
                        hard: event.hard != 0,
                    }));
                }
            }
            Ok(_) => break,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(rfkill_error("read state of", interface, e)),
        }
    }

    Ok(None)
}

/// True iff the interface is hardware-blocked (physical switch).
pub fn hard_blocked(interface: &str) -> Result<bool> {
    Ok(block_state(interface)?.map(|s| s.hard).unwrap_or(false))
}

/// True iff the interface is software-blocked.
pub fn soft_blocked(interface: &str) -> Result<bool> {
    Ok(block_state(interface)?.map(|s| s.soft).unwrap_or(false))
}

/// Remove a software block. Hardware blocks cannot be cleared from here.
pub fn clear_soft_block(interface: &str) -> Result<()> {
    let idx = find_index(interface)?.ok_or_else(|| {
        rfkill_error("unblock", interface, "no rfkill device for interface")
    })?;

    let mut file = OpenOptions::new()
        .write(true)
        .open(DEV_RFKILL)
        .map_err(|e| rfkill_error("open /dev/rfkill for", interface, e))?;

    let event = RfkillEvent {
        idx,
        type_: 0,
        op: RFKILL_OP_CHANGE,
        soft: 0,
        hard: 0,
    };

    file.write_all(&event.to_bytes())
        .map_err(|e| rfkill_error("unblock", interface, e))?;

    tracing::info!(interface, idx, "cleared rfkill soft block");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trip_matches_kernel_abi() {
        assert_eq!(std::mem::size_of::<RfkillEvent>(), RfkillEvent::SIZE);

        let event = RfkillEvent {
            idx: 3,
            type_: 1,
            op: RFKILL_OP_CHANGE,
            soft: 1,
            hard: 0,
        };
        let bytes = event.to_bytes();
        let back = RfkillEvent::from_bytes(&bytes);
        let (idx, op, soft, hard) = (back.idx, back.op, back.soft, back.hard);
        assert_eq!(idx, 3);
        assert_eq!(op, RFKILL_OP_CHANGE);
        assert_eq!(soft, 1);
        assert_eq!(hard, 0);
    }

    #[test]
    fn interfaces_without_rfkill_are_unblocked() {
        // Loopback has no radio; both queries must come back false.
        assert!(!hard_blocked("lo").unwrap());
        assert!(!soft_blocked("lo").unwrap());
    }
}
