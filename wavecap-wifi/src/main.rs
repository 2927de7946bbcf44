#![deny(unsafe_op_in_unsafe_fn)]
//! Linux Wi-Fi capture helper.
//!
//! A privileged, single-interface subprocess: it coerces one wireless
//! interface into monitor mode, streams raw 802.11 frames to the parent
//! over an fd pair, and retunes channels on command. Must run as root to
//! control the interface and keep controlling it while hopping.

use std::os::fd::RawFd;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod capture;
mod channels;
mod phy_table;
mod source;
mod uuid;

use source::WifiSource;
use wavecap_proto::CaptureHandler;

#[derive(Parser, Debug)]
#[command(name = "capture_linux_wifi", version, about)]
struct Args {
    /// Descriptor to read control requests from
    #[arg(long = "in-fd")]
    in_fd: RawFd,

    /// Descriptor to write replies and captured frames to
    #[arg(long = "out-fd")]
    out_fd: RawFd,
}

fn main() -> Result<()> {
    // stderr is diagnostics only; the protocol owns the fd pair.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(pid = std::process::id(), "capture helper starting");

    let mut handler = CaptureHandler::from_fds(WifiSource::new(), args.in_fd, args.out_fd);
    // Spacing 4 keeps consecutive 2.4 GHz hops on non-overlapping channels.
    handler.set_hop_shuffle_spacing(4);

    let run_result = handler.run();

    // Whatever ended the loop, hand the interface back to NetworkManager if
    // we took it away. Best effort only.
    let source = handler.into_source();
    restore_networkmanager(&source);

    run_result.context("control loop failed")?;
    info!("capture helper exiting");
    Ok(())
}

fn restore_networkmanager(source: &WifiSource) {
    if !source.reset_nm_on_exit() {
        return;
    }
    let Some(interface) = source.interface() else {
        return;
    };

    match wavecap_netlink::NmClient::connect() {
        Ok(nm) if nm.running() => match nm.device_path(interface) {
            Ok(path) => match nm.set_device_managed(&path, true) {
                Ok(()) => info!(interface, "returned interface to NetworkManager"),
                Err(e) => warn!(interface, "could not re-manage interface: {e}"),
            },
            Err(e) => warn!(interface, "NetworkManager no longer knows the interface: {e}"),
        },
        Ok(_) => {}
        Err(e) => warn!(interface, "could not reconnect to NetworkManager: {e}"),
    }
}
