//! Discovery workers and their supervisor.
//!
//! Workers report devices into the shared [`TunerContext`]:
//! - [`StaticDiscovery`]: devices listed in the configuration file
//! - [`UdpDiscovery`]: JSON announcements from tuner boxes on the LAN
//!
//! The [`DiscoverySupervisor`] owns the worker tasks. Stopping signals every
//! worker, then waits for each one with a bounded timeout, retrying a fixed
//! number of times before aborting it.
//!
//! [`TunerContext`]: vtuner_core::TunerContext

pub mod static_config;
pub mod udp;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use static_config::StaticDiscovery;
pub use udp::UdpDiscovery;

/// Default time to wait for one worker to stop, per attempt.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default number of bounded waits before a worker is aborted.
pub const DEFAULT_STOP_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind discovery socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed announcement from {source_addr}: {reason}")]
    Announcement { source_addr: SocketAddr, reason: String },
}

/// Receiver side of the stop signal handed to every worker.
///
/// Workers finish when the value becomes `true` or the sender is dropped.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Resolves once a stop has been requested.
pub async fn stop_requested(shutdown: &mut ShutdownSignal) {
    loop {
        let stopped = *shutdown.borrow();
        if stopped || shutdown.changed().await.is_err() {
            return;
        }
    }
}

struct Worker {
    name: String,
    join: JoinHandle<()>,
}

/// Outcome of [`DiscoverySupervisor::stop`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Workers that finished on their own.
    pub joined: Vec<String>,
    /// Workers that had to be aborted.
    pub aborted: Vec<String>,
}

pub struct DiscoverySupervisor {
    shutdown: watch::Sender<bool>,
    workers: Vec<Worker>,
    stop_timeout: Duration,
    stop_attempts: u32,
}

impl Default for DiscoverySupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TIMEOUT, DEFAULT_STOP_ATTEMPTS)
    }
}

impl DiscoverySupervisor {
    pub fn new(stop_timeout: Duration, stop_attempts: u32) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            workers: Vec::new(),
            stop_timeout,
            stop_attempts: stop_attempts.max(1),
        }
    }

    /// Start a worker task. Its error, if any, is logged when it finishes.
    pub fn spawn<F, Fut>(&mut self, name: &str, worker: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = Result<(), DiscoveryError>> + Send + 'static,
    {
        let task_name = name.to_string();
        let fut = worker(self.shutdown.subscribe());
        let join = tokio::spawn(async move {
            match fut.await {
                Ok(()) => debug!("Discovery worker {} finished", task_name),
                Err(e) => error!("Discovery worker {} failed: {}", task_name, e),
            }
        });

        info!("Started discovery worker {}", name);
        self.workers.push(Worker {
            name: name.to_string(),
            join,
        });
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    /// Signal every worker and wait for them to finish.
    ///
    /// A worker that is still running after `stop_attempts` waits of
    /// `stop_timeout` is aborted. Failures are logged and never propagated.
    pub async fn stop(self) -> StopReport {
        // No receivers left just means every worker already returned.
        let _ = self.shutdown.send(true);

        let mut report = StopReport::default();
        for mut worker in self.workers {
            let mut finished = false;

            for attempt in 1..=self.stop_attempts {
                match tokio::time::timeout(self.stop_timeout, &mut worker.join).await {
                    Ok(Ok(())) => {
                        finished = true;
                        break;
                    }
                    Ok(Err(e)) => {
                        error!("Discovery worker {} terminated abnormally: {}", worker.name, e);
                        finished = true;
                        break;
                    }
                    Err(_) => {
                        warn!(
                            "Discovery worker {} did not stop within {:?} (attempt {}/{})",
                            worker.name, self.stop_timeout, attempt, self.stop_attempts
                        );
                    }
                }
            }

            if finished {
                debug!("Discovery worker {} stopped", worker.name);
                report.joined.push(worker.name);
            } else {
                error!("Aborting discovery worker {}", worker.name);
                worker.join.abort();
                // A task blocking its thread only observes the abort at its next await.
                if tokio::time::timeout(self.stop_timeout, &mut worker.join).await.is_err() {
                    error!(
                        "Discovery worker {} did not finish within {:?} after abort",
                        worker.name, self.stop_timeout
                    );
                }
                report.aborted.push(worker.name);
            }
        }

        info!(
            "Discovery stopped ({} joined, {} aborted)",
            report.joined.len(),
            report.aborted.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cooperative_workers_are_joined() {
        let mut supervisor = DiscoverySupervisor::new(Duration::from_millis(200), 2);
        supervisor.spawn("first", |mut shutdown| async move {
            stop_requested(&mut shutdown).await;
            Ok(())
        });
        supervisor.spawn("second", |_| async move {
            Err(DiscoveryError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "gone",
            )))
        });
        assert_eq!(supervisor.worker_names(), vec!["first", "second"]);

        let report = supervisor.stop().await;
        assert_eq!(report.joined, vec!["first", "second"]);
        assert!(report.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_worker_is_aborted() {
        let mut supervisor = DiscoverySupervisor::new(Duration::from_millis(20), 3);
        supervisor.spawn("stuck", |_shutdown| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });

        let started = std::time::Instant::now();
        let report = supervisor.stop().await;
        assert_eq!(report.aborted, vec!["stuck"]);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_wait_is_bounded() {
        let mut supervisor = DiscoverySupervisor::new(Duration::from_millis(20), 1);
        supervisor.spawn("blocking", |_shutdown| async move {
            // Holds its worker thread without yielding.
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = std::time::Instant::now();
        let report = supervisor.stop().await;
        assert_eq!(report.aborted, vec!["blocking"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_without_workers() {
        let report = DiscoverySupervisor::default().stop().await;
        assert_eq!(report, StopReport::default());
    }

    #[tokio::test]
    async fn test_stop_requested_on_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        stop_requested(&mut rx).await;
    }
}
