#![deny(unsafe_op_in_unsafe_fn)]
#![cfg(target_os = "linux")]
//! # wavecap-netlink
//!
//! The privileged Linux plumbing the wavecap Wi-Fi helper stands on: the
//! nl80211 generic-netlink control plane, the legacy wireless-extensions
//! ioctl plane, plain interface flag control, rfkill, and an optional
//! NetworkManager client. Everything here requires root (or the matching
//! capabilities) at runtime; nothing here decides policy.

pub mod error;
pub mod ifcontrol;
pub mod networkmanager;
pub mod nl80211;
pub mod rfkill;
pub mod wext;

pub use error::{NetlinkError, Result};
pub use ifcontrol::{
    hardware_address, ifindex, interface_down, interface_exists, interface_flags, interface_up,
    is_wireless_interface, list_interfaces,
};
pub use networkmanager::NmClient;
pub use nl80211::{HtMode, MonitorFlag, Nl80211Socket, Width};
pub use rfkill::{clear_soft_block, hard_blocked, soft_blocked};
