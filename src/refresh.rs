// Periodic rebuild of the port ownership generation

use crate::backends::process::ProcessIntrospector;
use crate::generation::{Generation, GenerationStore, SwapOutcome};
use crate::inventory::build_inventory;
use crate::resolver::resolve_ports;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Summary of one refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub inodes: usize,
    pub members: usize,
    pub ports: usize,
    pub failed_tables: usize,
    pub swap: SwapOutcome,
}

/// Builds generations for one process tree and installs them
///
/// The only writer of its [`GenerationStore`].
pub struct Refresher {
    root_pid: i32,
    introspector: Arc<dyn ProcessIntrospector>,
    store: Arc<GenerationStore>,
}

impl Refresher {
    pub fn new(
        root_pid: i32,
        introspector: Arc<dyn ProcessIntrospector>,
        store: Arc<GenerationStore>,
    ) -> Self {
        Self {
            root_pid,
            introspector,
            store,
        }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    /// Inventory, resolve and swap in a fresh generation
    ///
    /// Scan failures only shrink the new generation; this never fails.
    pub fn refresh(&self) -> RefreshSummary {
        let inventory = build_inventory(self.root_pid, self.introspector.as_ref());
        let resolution = resolve_ports(&inventory.inodes, self.introspector.as_ref());

        let inodes = inventory.inodes.len();
        let ports = resolution.ports.total_ports();
        let failed_tables = resolution.failed_tables.len();
        let (tcp4, tcp6) = (resolution.ports.tcp4.len(), resolution.ports.tcp6.len());
        let (udp4, udp6) = (resolution.ports.udp4.len(), resolution.ports.udp6.len());
        let swap = self
            .store
            .swap(Generation::new(inventory.inodes, resolution.ports));

        log::debug!(
            "Generation {}: {} processes, {} sockets, ports tcp={} tcp6={} udp={} udp6={} \
             ({} skipped processes, {} failed tables)",
            swap.serial,
            inventory.members.len(),
            inodes,
            tcp4,
            tcp6,
            udp4,
            udp6,
            inventory.skipped,
            failed_tables
        );
        if let Some(rec) = swap.reconciliation {
            if rec.recovered_bytes > 0 || rec.dropped_bytes > 0 {
                log::debug!(
                    "Reconciled generation {}: recovered tx4={} rx4={} tx6={} rx6={} on {} ports, \
                     dropped {} bytes",
                    rec.retired_serial,
                    rec.recovered.tx_ipv4,
                    rec.recovered.rx_ipv4,
                    rec.recovered.tx_ipv6,
                    rec.recovered.rx_ipv6,
                    rec.recovered_ports,
                    rec.dropped_bytes
                );
            }
        }

        RefreshSummary {
            inodes,
            members: inventory.members.len(),
            ports,
            failed_tables,
            swap,
        }
    }
}

/// Refresh every `period` until cancelled
///
/// The first refresh is expected to have run before this starts, so the
/// first tick fires one period from now. The `/proc` scan runs on the
/// blocking pool.
pub async fn run_refresh_loop(
    refresher: Arc<Refresher>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let worker = Arc::clone(&refresher);
        if let Err(e) = tokio::task::spawn_blocking(move || worker.refresh()).await {
            log::error!("Refresh task failed: {}", e);
        }
    }

    log::debug!("Refresh loop stopped");
}
