use thiserror::Error;

/// Unified error type for the plumbing crate.
///
/// Variants carry enough context for an operator-facing message: what was
/// attempted, on which interface, and why the kernel said no.
#[derive(Error, Debug)]
pub enum NetlinkError {
    #[error("Interface '{name}' not found. Verify it exists with 'ip link show'.")]
    InterfaceNotFound { name: String },

    #[error("Failed to read {what} for interface '{interface}': {reason}")]
    SysfsRead {
        what: &'static str,
        interface: String,
        reason: String,
    },

    #[error("Failed to connect to nl80211: {0}")]
    Nl80211Connect(String),

    #[error("nl80211 {operation} failed on '{interface}': {reason}")]
    Nl80211Operation {
        operation: &'static str,
        interface: String,
        reason: String,
    },

    #[error("Wireless-extensions ioctl {ioctl} failed on '{interface}': {source}")]
    WextIoctl {
        ioctl: &'static str,
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {operation} interface '{interface}': {source}")]
    IfControl {
        operation: &'static str,
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rfkill {operation} failed for '{interface}': {reason}")]
    Rfkill {
        operation: &'static str,
        interface: String,
        reason: String,
    },

    #[error("NetworkManager: {0}")]
    NetworkManager(String),

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, NetlinkError>;

impl NetlinkError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
