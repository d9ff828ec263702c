// Port resolution: which local ports belong to the monitored inodes

use crate::backends::process::{ProcessIntrospector, SocketEntry};
use crate::generation::{InodeSet, PortMap, PortTables};
use crate::traffic::{IpVersion, Transport, table_name};

/// Port tables for one refresh, plus the tables that could not be read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub ports: PortTables,
    pub failed_tables: Vec<&'static str>,
}

/// Build the four port maps restricted to `inodes`
///
/// An unreadable table leaves its map empty for this cycle; the other
/// tables are still resolved.
pub fn resolve_ports(inodes: &InodeSet, introspector: &dyn ProcessIntrospector) -> Resolution {
    let mut resolution = Resolution::default();

    for transport in Transport::ALL {
        for version in IpVersion::ALL {
            match introspector.address_table(transport, version) {
                Ok(entries) => {
                    *resolution.ports.get_mut(transport, version) = port_map(&entries, inodes);
                }
                Err(e) => {
                    let table = table_name(transport, version);
                    log::warn!("Skipping {} table this cycle: {:#}", table, e);
                    resolution.failed_tables.push(table);
                }
            }
        }
    }

    resolution
}

/// Keep the entries whose inode is in `inodes`, keyed by local port
///
/// Port 0 (unbound) and inode 0 (no owner, e.g. TIME_WAIT) never match.
pub fn port_map(entries: &[SocketEntry], inodes: &InodeSet) -> PortMap {
    entries
        .iter()
        .filter(|e| e.local_port != 0 && e.inode != 0 && inodes.contains(&e.inode))
        .map(|e| (e.local_port, e.inode))
        .collect()
}
