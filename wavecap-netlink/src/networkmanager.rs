//! Minimal NetworkManager D-Bus client.
//!
//! Used only to ask NetworkManager to keep its hands off an interface for
//! the duration of a capture, and to hand it back afterwards. The client is
//! meant to be short-lived: connect, act, drop. Holding it open subscribes
//! this process to NM's event stream, which nobody here reads.

use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::OwnedObjectPath;

use crate::error::{NetlinkError, Result};

const NM_DEST: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_IFACE: &str = "org.freedesktop.NetworkManager";
const NM_DEVICE_IFACE: &str = "org.freedesktop.NetworkManager.Device";

fn nm_error(e: impl ToString) -> NetlinkError {
    NetlinkError::NetworkManager(e.to_string())
}

pub struct NmClient {
    connection: Connection,
}

impl NmClient {
    /// Connect to the system bus. Fails when D-Bus itself is unreachable.
    pub fn connect() -> Result<Self> {
        let connection = Connection::system()
            .map_err(|e| nm_error(format!("failed to connect to system D-Bus: {e}")))?;
        Ok(Self { connection })
    }

    fn manager_proxy(&self) -> Result<Proxy<'_>> {
        Proxy::new(&self.connection, NM_DEST, NM_PATH, NM_IFACE).map_err(nm_error)
    }

    fn device_proxy(&self, path: &OwnedObjectPath) -> Result<Proxy<'_>> {
        Proxy::new(&self.connection, NM_DEST, path.clone(), NM_DEVICE_IFACE).map_err(nm_error)
    }

    /// True iff NetworkManager is actually on the bus and answering.
    pub fn running(&self) -> bool {
        self.manager_proxy()
            .and_then(|p| p.get_property::<String>("Version").map_err(nm_error))
            .is_ok()
    }

    /// NM's object path for a device, by kernel interface name.
    pub fn device_path(&self, interface: &str) -> Result<OwnedObjectPath> {
        let proxy = self.manager_proxy()?;
        proxy
            .call_method("GetDeviceByIpIface", &(interface,))
            .map_err(|e| {
                nm_error(format!(
                    "no NetworkManager device for interface '{interface}': {e}"
                ))
            })?
            .body()
            .deserialize()
            .map_err(|e| nm_error(format!("failed to parse device path: {e}")))
    }

    /// Whether NM currently manages the device.
    pub fn device_managed(&self, path: &OwnedObjectPath) -> Result<bool> {
        self.device_proxy(path)?
            .get_property::<bool>("Managed")
            .map_err(|e| nm_error(format!("failed to read Managed property: {e}")))
    }

    /// Flip NM's management of the device on or off.
    pub fn set_device_managed(&self, path: &OwnedObjectPath, managed: bool) -> Result<()> {
        self.device_proxy(path)?
            .set_property("Managed", managed)
            .map_err(|e| {
                nm_error(format!(
                    "failed to set Managed={managed}: {e}"
                ))
            })?;
        tracing::info!(managed, "updated NetworkManager device management");
        Ok(())
    }
}
