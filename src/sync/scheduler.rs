// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::repository::DEFAULT_SYNC_BATCH_SIZE;

use super::{RetryPolicy, SyncWorker, WorkOutcome};

/// Shortest period accepted by [`SyncManager::spawn_periodic`]
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Knobs of the sync scheduler
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    /// Period of background syncs started by [`SyncManager::initialize`]
    pub interval: Option<Duration>,
    /// Ids requested per remote lookup
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            interval: None,
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }
}

/// Tells whether the device can currently reach the network
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Resolve once the network is reachable
    async fn wait_online(&self);
}

/// For hosts without connectivity tracking
pub struct AlwaysOnline;

#[async_trait]
impl NetworkMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    async fn wait_online(&self) {}
}

/// Connectivity fed through a watch channel
pub struct WatchNetworkMonitor {
    online: watch::Receiver<bool>,
}

impl WatchNetworkMonitor {
    /// Monitor plus the sender used to publish connectivity changes
    pub fn new(online: bool) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(online);
        (tx, Self { online: rx })
    }
}

#[async_trait]
impl NetworkMonitor for WatchNetworkMonitor {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    async fn wait_online(&self) {
        let mut online = self.online.clone();
        // A dropped sender means nobody tracks connectivity anymore
        let _ = online.wait_for(|online| *online).await;
    }
}

struct Inner {
    worker: SyncWorker,
    options: SyncOptions,
    network: Arc<dyn NetworkMonitor>,
    reporter: SharedProgressReporter,
    /// Held from `request_sync` until the run, retries included, is over
    in_flight: watch::Sender<bool>,
    /// Only `true` while the worker executes
    syncing: watch::Sender<bool>,
    shutdown: CancellationToken,
}

/// Clears a status flag when dropped, so a panicking run cannot leave it set
struct ClearOnDrop<'a>(&'a watch::Sender<bool>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Schedules sync passes so that at most one runs at any time.
///
/// Requests made while a run is in flight are coalesced into it. Failed
/// passes are retried with backoff according to [`SyncOptions::retry`].
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(
        worker: SyncWorker,
        options: SyncOptions,
        network: Arc<dyn NetworkMonitor>,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker,
                options,
                network,
                reporter,
                in_flight: watch::Sender::new(false),
                syncing: watch::Sender::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Start a sync run unless one is already in flight.
    ///
    /// Returns whether a new run was started.
    pub fn request_sync(&self) -> bool {
        if self.inner.shutdown.is_cancelled() {
            debug!("sync requested after shutdown");
            return false;
        }

        let claimed = self.inner.in_flight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            debug!("sync already in flight, request coalesced");
            return false;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _in_flight = ClearOnDrop(&inner.in_flight);
            inner.run().await;
        });
        true
    }

    /// `true` while a sync pass executes
    pub fn is_syncing(&self) -> watch::Receiver<bool> {
        self.inner.syncing.subscribe()
    }

    /// Sync once on start and, if configured, periodically afterwards
    pub fn initialize(&self) -> Option<JoinHandle<()>> {
        info!("starting initial sync");
        self.request_sync();
        self.inner
            .options
            .interval
            .map(|interval| self.spawn_periodic(interval))
    }

    /// Request a sync every `interval` until shutdown.
    ///
    /// Intervals below [`MIN_SYNC_INTERVAL`] are raised to it.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let interval = if interval < MIN_SYNC_INTERVAL {
            warn!(requested = ?interval, used = ?MIN_SYNC_INTERVAL, "sync interval too short");
            MIN_SYNC_INTERVAL
        } else {
            interval
        };

        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = manager.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("periodic sync due");
                        manager.request_sync();
                    }
                }
            }
        })
    }

    /// Cancel the run in flight and refuse further requests
    pub fn shutdown(&self) {
        info!("shutting down sync");
        self.inner.shutdown.cancel();
    }

    /// Wait until no run is in flight
    pub async fn wait_idle(&self) {
        let mut in_flight = self.inner.in_flight.subscribe();
        let _ = in_flight.wait_for(|busy| !*busy).await;
    }
}

impl Inner {
    async fn run(&self) {
        let policy = &self.options.retry;

        for attempt in 1..=policy.max_attempts() {
            if !self.wait_for_network().await {
                return;
            }

            self.reporter
                .report(ProgressEvent::SyncPassStarted { attempt });
            let result = {
                self.syncing.send_replace(true);
                let _syncing = ClearOnDrop(&self.syncing);
                self.worker.do_work(&self.shutdown).await
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    info!(error = %e, "sync run stopped");
                    return;
                }
            };

            self.reporter.report(ProgressEvent::SyncPassCompleted {
                success: outcome == WorkOutcome::Success,
            });

            match outcome {
                WorkOutcome::Success => {
                    info!(attempt, "sync pass succeeded");
                    return;
                }
                WorkOutcome::Failure => {
                    error!(attempt, "sync pass failed, not retrying");
                    return;
                }
                WorkOutcome::Retry if attempt == policy.max_attempts() => {
                    warn!(attempt, "sync pass incomplete, giving up");
                    return;
                }
                WorkOutcome::Retry => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(attempt, delay = ?delay, "sync pass incomplete, retrying");
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// `false` if shutdown happened while waiting
    async fn wait_for_network(&self) -> bool {
        if self.network.is_online() {
            return true;
        }

        info!("waiting for network before syncing");
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = self.network.wait_online() => true,
        }
    }
}
