use crate::backends::capture::CaptureBackend;
use crate::backends::process::ProcessIntrospector;
use crate::classifier::{ClassifierStats, TrafficClassifier};
use crate::config::MonitorConfig;
use crate::generation::GenerationStore;
use crate::meter::MeterSet;
use crate::refresh::{Refresher, run_refresh_loop};
use crate::report::run_report_loop;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Back-off after a failed receive
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Wires the refresh, capture and report loops around one generation store
pub struct Monitor {
    config: MonitorConfig,
    refresher: Arc<Refresher>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, introspector: Arc<dyn ProcessIntrospector>) -> Self {
        let store = Arc::new(GenerationStore::new(Arc::new(MeterSet::new())));
        let refresher = Arc::new(Refresher::new(config.root_pid, introspector, store));
        Self { config, refresher }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        self.refresher.store()
    }

    pub fn meters(&self) -> &Arc<MeterSet> {
        self.store().meters()
    }

    /// Run until `token` is cancelled
    ///
    /// The first generation is installed before capture starts. A capture
    /// backend that fails to open stops only the capture thread.
    pub async fn run<F>(&self, open_capture: F, token: CancellationToken) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn CaptureBackend>> + Send + 'static,
    {
        let refresher = Arc::clone(&self.refresher);
        let first = tokio::task::spawn_blocking(move || refresher.refresh())
            .await
            .context("Initial refresh failed")?;
        log::info!(
            "Monitoring pid {}: {} processes, {} sockets, {} ports",
            self.config.root_pid,
            first.members,
            first.inodes,
            first.ports
        );

        let capture = spawn_capture_thread(open_capture, Arc::clone(self.store()), token.clone())?;

        let refresh = tokio::spawn(run_refresh_loop(
            Arc::clone(&self.refresher),
            self.config.refresh_interval(),
            token.clone(),
        ));
        let report = tokio::spawn(run_report_loop(
            Arc::clone(self.meters()),
            self.config.report_interval(),
            self.config.format,
            token.clone(),
        ));

        token.cancelled().await;
        match self.store().current() {
            Some(current) => log::info!(
                "Shutting down after {} generations (generation {} tracked {} sockets)",
                self.store().installed(),
                current.serial(),
                current.inodes().len()
            ),
            None => log::info!("Shutting down"),
        }

        if let Err(e) = refresh.await {
            log::error!("Refresh task panicked: {}", e);
        }
        if let Err(e) = report.await {
            log::error!("Report task panicked: {}", e);
        }

        let stats = tokio::task::spawn_blocking(move || capture.join())
            .await
            .context("Failed to join capture thread")?;
        match stats {
            Ok(Some(stats)) => log::debug!(
                "Capture stopped: {} attributed, {} deferred, {} discarded packets",
                stats.attributed,
                stats.deferred,
                stats.discarded
            ),
            Ok(None) => {}
            Err(_) => log::error!("Capture thread panicked"),
        }

        Ok(())
    }
}

/// Open the capture backend and classify packets on a dedicated thread
///
/// The thread returns `None` if the backend could not be opened; the rest of
/// the monitor keeps running with counters that no longer move.
pub fn spawn_capture_thread<F>(
    open_capture: F,
    store: Arc<GenerationStore>,
    token: CancellationToken,
) -> Result<JoinHandle<Option<ClassifierStats>>>
where
    F: FnOnce() -> Result<Box<dyn CaptureBackend>> + Send + 'static,
{
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let backend = match open_capture() {
                Ok(backend) => backend,
                Err(e) => {
                    log::error!("Packet capture unavailable: {:#}", e);
                    return None;
                }
            };
            log::info!("Capturing with {} backend", backend.name());

            let classifier = TrafficClassifier::new(backend.local_addrs(), store);
            Some(run_capture_loop(backend, &classifier, &token))
        })
        .context("Failed to spawn capture thread")
}

/// Classify packets until cancelled
pub fn run_capture_loop(
    mut backend: Box<dyn CaptureBackend>,
    classifier: &TrafficClassifier,
    token: &CancellationToken,
) -> ClassifierStats {
    let mut stats = ClassifierStats::default();

    while !token.is_cancelled() {
        match backend.next_packet() {
            Ok(Some(packet)) => stats.record(&classifier.classify(&packet)),
            Ok(None) => {}
            Err(e) => {
                log::error!("{:#}", e);
                thread::sleep(RECV_ERROR_BACKOFF);
            }
        }
    }

    stats
}
