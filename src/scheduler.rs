//! Scheduler actor
//!
//! One task owns the [`Cn8ptBridge`] and interleaves everything that talks to the
//! device:
//!
//! 1. echo-enable, then every startup hook in declaration order (the output channel
//!    selector resolves its mode/range/type triple as part of its own hook),
//! 2. external writes and on-demand polls received as [`BridgeCommand`]s,
//! 3. the periodic temperature poll.
//!
//! Commands that arrive during startup wait in the channel until startup is done.
//! Hosts talk to the actor through a cloneable [`BridgeHandle`]; reads go straight
//! to the registry and never touch the device.

use crate::bridge::Cn8ptBridge;
use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::error_recovery::{retry_with_policy, RetryPolicy};
use crate::messages::BridgeCommand;
use crate::point::{ChannelConfig, PointDescriptor, PointId, PointStatus, PointValue};
use crate::registry::{PointSnapshot, Registry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 32;

/// Outcome of one startup sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    /// Whether the echo-enable command succeeded.
    pub echo_enabled: bool,
    /// Points whose startup hook succeeded.
    pub synchronized: Vec<PointId>,
    /// Points whose startup hook failed after all retries, with the last error.
    pub failed: Vec<(PointId, String)>,
}

impl StartupReport {
    /// True when every startup hook succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives startup, writes and polling for one bridge.
pub struct Scheduler {
    bridge: Arc<Cn8ptBridge>,
    poll_period: Duration,
    retry: RetryPolicy,
}

impl Scheduler {
    /// Create a scheduler using the scan and startup sections of `settings`.
    pub fn new(bridge: Arc<Cn8ptBridge>, settings: &Settings) -> Self {
        Self::with_parameters(
            bridge,
            settings.temperature_period(),
            RetryPolicy::from(&settings.startup),
        )
    }

    /// Create a scheduler with explicit poll period and startup retry policy.
    pub fn with_parameters(
        bridge: Arc<Cn8ptBridge>,
        poll_period: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            bridge,
            poll_period,
            retry,
        }
    }

    /// Spawn the actor task and return a handle to it.
    pub fn spawn(self) -> (BridgeHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = BridgeHandle {
            tx,
            registry: self.bridge.registry().clone(),
            poll_period: self.poll_period,
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Enable echo, then run every startup hook.
    ///
    /// Failures are logged and reported; they never stop the sequence.
    pub async fn run_startup(&self) -> StartupReport {
        let mut report = StartupReport::default();

        match self.bridge.enable_echo().await {
            Ok(()) => report.echo_enabled = true,
            Err(e) => warn!(error = %e, "echo enable failed; continuing startup"),
        }

        for id in PointId::ALL {
            if !id.descriptor().hooks.startup {
                continue;
            }
            let bridge = &self.bridge;
            match retry_with_policy(&self.retry, || bridge.startup(id)).await {
                Ok(()) => {
                    debug!(point = %id, "startup hook done");
                    report.synchronized.push(id);
                }
                Err(e) => {
                    warn!(
                        point = %id,
                        error = %e,
                        "startup hook failed; point stays uninitialized"
                    );
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            synchronized = report.synchronized.len(),
            failed = report.failed.len(),
            "startup finished"
        );
        report
    }

    /// Run the actor loop until shutdown or until every handle is dropped.
    pub async fn run(self, mut command_rx: mpsc::Receiver<BridgeCommand>) {
        info!(poll_period = ?self.poll_period, "scheduler started");
        self.run_startup().await;

        let mut ticker = interval(self.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_all().await;
                }
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        info!("all handles dropped");
                        break;
                    };
                    match command {
                        BridgeCommand::Write { point, value, response } => {
                            let result = self.bridge.write(point, value).await;
                            if let Err(e) = &result {
                                warn!(point = %point, error = %e, "write rejected");
                            }
                            let _ = response.send(result);
                        }
                        BridgeCommand::Poll { point, response } => {
                            let _ = response.send(self.bridge.poll(point).await);
                        }
                        BridgeCommand::Resync { response } => {
                            let _ = response.send(self.run_startup().await);
                        }
                        BridgeCommand::Shutdown { response } => {
                            info!("Shutdown command received");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    async fn poll_all(&self) {
        for id in PointId::ALL {
            if !id.descriptor().hooks.poll {
                continue;
            }
            // poll() already logs and marks the point stale
            if let Err(e) = self.bridge.poll(id).await {
                debug!(point = %id, error = %e, "poll failed");
            }
        }
    }
}

/// Cloneable host-side handle to a running scheduler.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeCommand>,
    registry: Arc<Registry>,
    poll_period: Duration,
}

impl BridgeHandle {
    async fn request<T>(
        &self,
        (command, rx): (BridgeCommand, tokio::sync::oneshot::Receiver<T>),
    ) -> BridgeResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BridgeError::SchedulerClosed)?;
        rx.await.map_err(|_| BridgeError::SchedulerClosed)
    }

    /// Write a value to the point with the given published name.
    pub async fn write(&self, name: &str, value: PointValue) -> BridgeResult<()> {
        self.write_point(PointId::from_name(name)?, value).await
    }

    /// Write a value to a point.
    pub async fn write_point(&self, point: PointId, value: PointValue) -> BridgeResult<()> {
        self.request(BridgeCommand::write(point, value)).await?
    }

    /// Poll a point now.
    pub async fn poll(&self, point: PointId) -> BridgeResult<()> {
        self.request(BridgeCommand::poll(point)).await?
    }

    /// Re-run echo-enable and the startup hooks.
    pub async fn resync(&self) -> BridgeResult<StartupReport> {
        self.request(BridgeCommand::resync()).await
    }

    /// Stop the scheduler and wait for it to acknowledge.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.request(BridgeCommand::shutdown()).await
    }

    /// Declarations of every point.
    pub fn descriptors(&self) -> Vec<PointDescriptor> {
        self.registry.descriptors()
    }

    /// Refresh period of a periodically polled point, `None` for the others.
    pub fn refresh_period(&self, point: PointId) -> Option<Duration> {
        point.descriptor().hooks.poll.then_some(self.poll_period)
    }

    /// Current value of the named point.
    pub fn value(&self, name: &str) -> BridgeResult<PointValue> {
        Ok(self.registry.by_name(name)?.get())
    }

    /// Current status of the named point.
    pub fn status(&self, name: &str) -> BridgeResult<PointStatus> {
        Ok(self.registry.by_name(name)?.status())
    }

    /// Subscribe to value changes of the named point.
    pub fn subscribe(&self, name: &str) -> BridgeResult<watch::Receiver<PointValue>> {
        Ok(self.registry.by_name(name)?.subscribe())
    }

    /// Current output channel configuration.
    pub fn channel(&self) -> ChannelConfig {
        self.registry.channel()
    }

    /// Value, label and status of every point.
    pub fn snapshot(&self) -> Vec<PointSnapshot> {
        self.registry.snapshot()
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
