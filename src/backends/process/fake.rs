// In-memory introspector for tests

use super::{ProcessIntrospector, ProcessStatus, SocketEntry};
use crate::backends::BackendPriority;
use crate::generation::InodeSet;
use crate::traffic::{IpVersion, Transport};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    fds: HashMap<i32, InodeSet>,
    parents: Vec<ProcessStatus>,
    tables: HashMap<(Transport, IpVersion), Vec<SocketEntry>>,
    broken_tables: HashSet<(Transport, IpVersion)>,
    process_list_broken: bool,
}

/// Scriptable process/socket view; mutable between refreshes
#[derive(Default)]
pub struct FakeIntrospector {
    state: Mutex<State>,
}

impl FakeIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live process holding `inodes`
    pub fn add_process(&self, pid: i32, ppid: i32, inodes: &[u64]) {
        let mut state = self.state.lock().unwrap();
        state.parents.retain(|p| p.pid != pid);
        state.parents.push(ProcessStatus { pid, ppid });
        state.fds.insert(pid, inodes.iter().copied().collect());
    }

    pub fn remove_process(&self, pid: i32) {
        let mut state = self.state.lock().unwrap();
        state.parents.retain(|p| p.pid != pid);
        state.fds.remove(&pid);
    }

    /// Hide a process's descriptors while keeping it in the process list
    pub fn hide_fds(&self, pid: i32) {
        self.state.lock().unwrap().fds.remove(&pid);
    }

    pub fn bind(&self, transport: Transport, version: IpVersion, local_port: u16, inode: u64) {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry((transport, version))
            .or_default()
            .push(SocketEntry { local_port, inode });
    }

    pub fn break_table(&self, transport: Transport, version: IpVersion) {
        self.state
            .lock()
            .unwrap()
            .broken_tables
            .insert((transport, version));
    }

    pub fn break_process_list(&self) {
        self.state.lock().unwrap().process_list_broken = true;
    }
}

impl ProcessIntrospector for FakeIntrospector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available() -> bool {
        true
    }

    fn socket_inodes(&self, pid: i32) -> Result<InodeSet> {
        self.state
            .lock()
            .unwrap()
            .fds
            .get(&pid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such process {}", pid))
    }

    fn processes(&self) -> Result<Vec<ProcessStatus>> {
        let state = self.state.lock().unwrap();
        if state.process_list_broken {
            anyhow::bail!("process list unavailable");
        }
        Ok(state.parents.clone())
    }

    fn address_table(&self, transport: Transport, version: IpVersion) -> Result<Vec<SocketEntry>> {
        let state = self.state.lock().unwrap();
        if state.broken_tables.contains(&(transport, version)) {
            anyhow::bail!("table {}{} unreadable", transport, version);
        }
        Ok(state
            .tables
            .get(&(transport, version))
            .cloned()
            .unwrap_or_default())
    }
}
