// Periodic throughput report on standard output

use crate::config::ReportFormat;
use crate::meter::{MeterSet, MeterSnapshot};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// One report line: cumulative totals and average rates over the window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub timestamp: String,
    pub tx_ipv4: u64,
    pub tx_ipv6: u64,
    pub rx_ipv4: u64,
    pub rx_ipv6: u64,
    /// Average bytes/second sent since the previous report
    pub tx_rate: u64,
    /// Average bytes/second received since the previous report
    pub rx_rate: u64,
}

impl Report {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.to_string()),
            ReportFormat::Json => {
                serde_json::to_string(self).context("Failed to serialize report")
            }
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Flow: tx4={} tx6={} rx4={} rx6={} tx/s={} rx/s={}",
            self.timestamp,
            self.tx_ipv4,
            self.tx_ipv6,
            self.rx_ipv4,
            self.rx_ipv6,
            self.tx_rate,
            self.rx_rate
        )
    }
}

/// Turns successive meter snapshots into reports
#[derive(Debug, Default)]
pub struct Reporter {
    last: MeterSnapshot,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `now` against the previous snapshot and remember it
    ///
    /// Rates are whole bytes per second over `elapsed` (at least one second).
    pub fn report(&mut self, now: MeterSnapshot, elapsed: Duration) -> Report {
        let secs = elapsed.as_secs().max(1);
        let tx_delta = now.total_tx().wrapping_sub(self.last.total_tx());
        let rx_delta = now.total_rx().wrapping_sub(self.last.total_rx());
        self.last = now;

        Report {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            tx_ipv4: now.tx_ipv4,
            tx_ipv6: now.tx_ipv6,
            rx_ipv4: now.rx_ipv4,
            rx_ipv6: now.rx_ipv6,
            tx_rate: tx_delta / secs,
            rx_rate: rx_delta / secs,
        }
    }
}

fn emit(report: &Report, format: ReportFormat) {
    match report.render(format) {
        Ok(line) => println!("{}", line),
        Err(e) => log::error!("{:#}", e),
    }
}

/// Print a report every `period` until cancelled, then a final partial one
pub async fn run_report_loop(
    meters: Arc<MeterSet>,
    period: Duration,
    format: ReportFormat,
    token: CancellationToken,
) {
    let mut reporter = Reporter::new();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        emit(
            &reporter.report(meters.snapshot(), now - last_report),
            format,
        );
        last_report = now;
    }

    emit(
        &reporter.report(meters.snapshot(), last_report.elapsed()),
        format,
    );
    log::debug!("Report loop stopped");
}
