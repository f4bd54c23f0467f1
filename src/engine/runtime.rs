// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};

use super::{Fleet, RuntimeEvent};

/// Drives the scheduling components in response to `RuntimeEvent`s and a
/// fixed-period sweep timer.
///
/// Failures while handling one event are logged and the loop carries on;
/// the affected operation is safe to repeat on the next event or tick.
pub struct Runtime {
    fleet: Fleet,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    sweep_interval: Duration,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(fleet: Fleet, event_rx: mpsc::Receiver<RuntimeEvent>) -> Self {
        let sweep_interval = fleet.monitor.settings().sweep_interval;
        Self {
            fleet,
            event_rx,
            sweep_interval,
        }
    }

    /// Main event loop.
    ///
    /// - Runs a liveness sweep every `sweep_interval` (first one immediately).
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Exits on `ShutdownRequested` or when every sender is gone.
    pub async fn run(mut self) -> Result<()> {
        info!(sweep_interval = ?self.sweep_interval, "fleetsched runtime started");

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        info!("runtime event channel closed; exiting");
                        break;
                    };
                    debug!(?event, "runtime received event");

                    match event {
                        RuntimeEvent::StartCampaign(id) => self.start_campaign(id).await,
                        RuntimeEvent::SweepRequested => self.sweep().await,
                        RuntimeEvent::ShutdownRequested => {
                            info!("shutdown requested; stopping runtime");
                            break;
                        }
                    }
                }
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn start_campaign(&self, id: crate::types::CampaignId) {
        match self.fleet.coordinator.start_campaign(id).await {
            Ok(campaign) => debug!(campaign = %id, status = ?campaign.status, "campaign start handled"),
            Err(err @ FleetError::DependencyCycle { .. }) => {
                warn!(campaign = %id, error = %err, "campaign rejected");
            }
            Err(err) => warn!(campaign = %id, error = %err, "campaign start failed"),
        }
    }

    /// One sweep, then re-aggregate the attacks it touched and any running
    /// attack a missed settle left behind.
    async fn sweep(&self) {
        let report = match self.fleet.monitor.sweep().await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "liveness sweep failed; will retry next tick");
                return;
            }
        };

        for attack in &report.attacks_to_settle {
            if let Err(err) = self.fleet.coordinator.settle_attack(*attack).await {
                warn!(attack = %attack, error = %err, "failed to settle attack after sweep");
            }
        }

        if let Err(err) = self.fleet.coordinator.settle_running().await {
            warn!(error = %err, "failed to re-settle running attacks; will retry next tick");
        }
    }
}

/// A running [`Runtime`], started and stopped explicitly.
#[derive(Debug)]
pub struct FleetService {
    events: mpsc::Sender<RuntimeEvent>,
    handle: JoinHandle<Result<()>>,
}

impl FleetService {
    /// Spawn the runtime loop on the current Tokio runtime.
    pub fn start(fleet: Fleet) -> Self {
        let (events, event_rx) = mpsc::channel::<RuntimeEvent>(64);
        let runtime = Runtime::new(fleet, event_rx);
        let handle = tokio::spawn(runtime.run());
        Self { events, handle }
    }

    /// Sender for feeding events from elsewhere (signal handlers, API layer).
    pub fn events(&self) -> mpsc::Sender<RuntimeEvent> {
        self.events.clone()
    }

    pub async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| FleetError::Other(anyhow::anyhow!("fleet runtime has stopped")))
    }

    /// Ask the loop to stop and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already have exited; that is the state we want.
        let _ = self.events.send(RuntimeEvent::ShutdownRequested).await;
        self.handle
            .await
            .map_err(|err| FleetError::Other(anyhow::anyhow!("runtime task failed: {err}")))?
    }
}
