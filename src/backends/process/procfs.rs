// Linux procfs-based process and socket introspection

use super::{ProcessIntrospector, ProcessStatus, SocketEntry};
use crate::backends::BackendPriority;
use crate::generation::InodeSet;
use crate::traffic::{IpVersion, Transport, table_name};
use ::procfs::process::{FDTarget, Process, all_processes_with_root};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_PROC_ROOT: &str = "/proc";

/// Introspector using the Linux /proc filesystem
///
/// This backend reads:
/// - /proc/[pid]/fd/ - for socket inodes
/// - /proc/[pid]/status - for parent pids
/// - /proc/net/{tcp,tcp6,udp,udp6} - for local port ownership
pub struct ProcfsIntrospector {
    root: PathBuf,
}

impl ProcfsIntrospector {
    pub fn new() -> Result<Self> {
        if !Self::is_available() {
            anyhow::bail!("procfs not available (is /proc mounted?)");
        }
        Ok(Self::with_root(DEFAULT_PROC_ROOT))
    }

    /// Use an alternative procfs mount point
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessIntrospector for ProcfsIntrospector {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best // Native Linux API, always available, fast
    }

    fn is_available() -> bool {
        Path::new(DEFAULT_PROC_ROOT).join("net/tcp").exists()
    }

    fn socket_inodes(&self, pid: i32) -> Result<InodeSet> {
        let process = Process::new_with_root(self.root.join(pid.to_string()))
            .with_context(|| format!("Failed to open process {}", pid))?;
        let fds = process
            .fd()
            .with_context(|| format!("Failed to list descriptors of process {}", pid))?;

        // Descriptors closed while we iterate are skipped
        Ok(fds
            .flatten()
            .filter_map(|fd| match fd.target {
                FDTarget::Socket(inode) if inode != 0 => Some(inode),
                _ => None,
            })
            .collect())
    }

    fn processes(&self) -> Result<Vec<ProcessStatus>> {
        let all_procs = all_processes_with_root(&self.root)
            .with_context(|| format!("Failed to enumerate processes under {:?}", self.root))?;

        let mut statuses = Vec::new();
        let mut unreadable = 0usize;
        for process in all_procs {
            match process.and_then(|p| p.status()) {
                Ok(status) => statuses.push(ProcessStatus {
                    pid: status.pid,
                    ppid: status.ppid,
                }),
                Err(_) => unreadable += 1,
            }
        }

        if unreadable > 0 {
            log::trace!("Skipped {} unreadable process status records", unreadable);
        }
        Ok(statuses)
    }

    fn address_table(&self, transport: Transport, version: IpVersion) -> Result<Vec<SocketEntry>> {
        let path = self.root.join("net").join(table_name(transport, version));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read address table {:?}", path))?;
        Ok(parse_address_table(&content))
    }
}

/// Parse the text of /proc/net/{tcp,tcp6,udp,udp6}
///
/// The first line is the column header. Records that do not carry a
/// `HEXADDR:HEXPORT` local address and a decimal inode are skipped.
pub(crate) fn parse_address_table(content: &str) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(parse_address_line)
        .collect()
}

fn parse_address_line(line: &str) -> Option<SocketEntry> {
    // sl local_address rem_address st tx:rx tr:when retrnsmt uid timeout inode ...
    let mut fields = line.split_whitespace();
    let local = fields.nth(1)?;
    let inode = fields.nth(7)?;

    Some(SocketEntry {
        local_port: parse_local_port(local)?,
        inode: inode.parse().ok()?,
    })
}

/// Port half of a `HEXADDR:HEXPORT` field; the address half is validated but discarded
fn parse_local_port(field: &str) -> Option<u16> {
    let (addr, port) = field.split_once(':')?;
    if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(port, 16).ok()
}
