// Process and socket introspection backends
//
// This module provides a trait-based abstraction over the operating system
// view of processes and sockets:
// - which socket inodes a process holds open
// - the parent of every running process
// - the local-port -> inode tables for TCP/UDP over IPv4/IPv6

use super::BackendPriority;
use crate::generation::InodeSet;
use crate::traffic::{IpVersion, Transport};
use anyhow::Result;

/// Parent link of one running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: i32,
    pub ppid: i32,
}

/// One record of a live address table
///
/// Only the local port and owning inode matter for attribution; the remote
/// side and the local IP are not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_port: u16,
    pub inode: u64,
}

/// Process/socket introspection backend trait
pub trait ProcessIntrospector: Send + Sync {
    /// Backend name (e.g., "procfs")
    fn name(&self) -> &'static str;

    /// Backend priority for auto-selection
    fn priority(&self) -> BackendPriority;

    /// Check if this backend is available on the current system
    fn is_available() -> bool
    where
        Self: Sized;

    /// Socket inodes currently held open by `pid`
    fn socket_inodes(&self, pid: i32) -> Result<InodeSet>;

    /// Every process visible on the host, with its parent
    ///
    /// Processes that vanish or cannot be read mid-scan are left out.
    fn processes(&self) -> Result<Vec<ProcessStatus>>;

    /// Records of one live address table; malformed records are left out
    fn address_table(&self, transport: Transport, version: IpVersion) -> Result<Vec<SocketEntry>>;
}

/// Introspection backend metadata for selection
#[derive(Debug, Clone)]
pub struct IntrospectorInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

#[cfg(target_os = "linux")]
pub mod procfs;

#[cfg(test)]
pub mod fake;

#[cfg(target_os = "linux")]
pub use self::procfs::ProcfsIntrospector;

/// Detect all introspection backends compiled into this build
pub fn detect_introspectors() -> Vec<IntrospectorInfo> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();

    #[cfg(target_os = "linux")]
    backends.push(IntrospectorInfo {
        name: "procfs",
        priority: BackendPriority::Best,
        available: ProcfsIntrospector::is_available(),
    });

    backends
}

/// Select an introspection backend, by name or by best availability
pub fn select_introspector(preference: Option<&str>) -> Result<Box<dyn ProcessIntrospector>> {
    if let Some(name) = preference {
        return create_introspector(name);
    }

    detect_introspectors()
        .iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .and_then(|info| create_introspector(info.name).ok())
        .ok_or_else(|| anyhow::anyhow!("No process introspection backend available"))
}

fn create_introspector(name: &str) -> Result<Box<dyn ProcessIntrospector>> {
    match name {
        #[cfg(target_os = "linux")]
        "procfs" => Ok(Box::new(ProcfsIntrospector::new()?)),

        _ => Err(anyhow::anyhow!("Unknown introspection backend: {}", name)),
    }
}
