//! Synthetic source UUIDs.
//!
//! A source has no persistent identity of its own, so the helper derives
//! one that is stable across runs: the adler32 of the helper name in the
//! first group, the interface MAC in the last.

/// Name constant folded into every UUID; changing it re-keys all sources.
pub const HELPER_NAME: &str = "capture_linux_wifi";

const ADLER_MOD: u32 = 65521;

fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + u32::from(byte)) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (b << 16) | a
}

/// `XXXXXXXX-0000-0000-0000-MMMMMMMMMMMM`, deterministic over
/// (helper name, MAC).
pub fn synthetic_uuid(mac: &[u8; 6]) -> String {
    format!(
        "{:08X}-0000-0000-0000-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        adler32(HELPER_NAME.as_bytes()),
        mac[0],
        mac[1],
        mac[2],
        mac[3],
        mac[4],
        mac[5]
    )
}
