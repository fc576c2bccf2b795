//! Thin network/filesystem collaborators: home-directory expansion, random
//! URL path minting, and local interface enumeration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rand::Rng;

const RANDOM_PATH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Expand a leading `~` in `path` to the current user's home directory.
/// Paths without a leading `~` are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Mint a random base36 path segment of the given length, used as the
/// unguessable URL prefix when `enable_random_url` is set.
pub fn mint_random_path(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..RANDOM_PATH_ALPHABET.len());
            RANDOM_PATH_ALPHABET[idx] as char
        })
        .collect()
}

/// Enumerate local, non-loopback IP addresses, used only to print
/// "listening on" lines when the configured bind address is a wildcard.
pub fn list_addresses() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect(),
        Err(_) => Vec::new(),
    }
}
