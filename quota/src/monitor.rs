//! Background thread periodically classifying application disk usage.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::errors::QuotaError;
use crate::table::QuotaTable;
use crate::usage::{AppUsage, Classification, scan};

pub struct QuotaMonitor {
    root: PathBuf,
    interval: Duration,
    table: Arc<QuotaTable>,
}

/// Owner of a running monitor. The table is released only after the thread
/// has been joined.
pub struct MonitorHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    table: Arc<QuotaTable>,
}

impl MonitorHandle {
    pub fn table(&self) -> &QuotaTable {
        &self.table
    }

    /// Signal the thread, wait for its current scan to finish, then drop
    /// the table.
    pub fn stop(self) -> Result<(), QuotaError> {
        let _ = self.stop_tx.send(());
        self.handle.join().map_err(|_| QuotaError::ThreadPanicked)?;
        drop(self.table);
        info!("Quota monitor stopped");
        Ok(())
    }
}

/// Log one scan with a level matching each application's state.
pub fn log_report(report: &[AppUsage]) {
    for entry in report {
        let AppUsage {
            app,
            usage,
            limit,
            state,
        } = entry;
        match state {
            Classification::Ok => {
                debug!(target: "phm::quota", app = %app, usage, limit, %state, "Disk usage ok")
            }
            Classification::AlmostFull => {
                warn!(target: "phm::quota", app = %app, usage, limit, %state, "Disk quota almost reached")
            }
            Classification::Full => {
                error!(target: "phm::quota", app = %app, usage, limit, %state, "Disk quota exceeded")
            }
        }
    }
}

impl QuotaMonitor {
    pub fn new(root: impl Into<PathBuf>, interval: Duration, table: QuotaTable) -> Self {
        Self {
            root: root.into(),
            interval,
            table: Arc::new(table),
        }
    }

    /// Start the monitor, logging every scan.
    pub fn spawn(self) -> Result<MonitorHandle, QuotaError> {
        self.spawn_with(|report| log_report(report))
    }

    /// Start the monitor, handing every completed scan to `report`.
    pub fn spawn_with(
        self,
        mut report: impl FnMut(&[AppUsage]) + Send + 'static,
    ) -> Result<MonitorHandle, QuotaError> {
        let (stop_tx, stop_rx) = bounded(1);
        let Self {
            root,
            interval,
            table,
        } = self;
        let shared = Arc::clone(&table);
        let handle = thread::Builder::new()
            .name("phm_monitor".to_string())
            .spawn(move || run(&root, interval, &shared, &stop_rx, &mut report))
            .map_err(QuotaError::ThreadCreation)?;
        Ok(MonitorHandle {
            stop_tx,
            handle,
            table,
        })
    }
}

fn run(
    root: &Path,
    interval: Duration,
    table: &QuotaTable,
    stop_rx: &Receiver<()>,
    report: &mut impl FnMut(&[AppUsage]),
) {
    info!(root = %root.display(), ?interval, "Quota monitor started");
    loop {
        match scan(root, table) {
            Ok(usage) => report(usage.as_slice()),
            Err(e) => warn!(root = %root.display(), "Quota scan failed: {e}"),
        }
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
