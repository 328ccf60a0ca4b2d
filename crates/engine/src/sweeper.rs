//! Background sweeper: expires overdue liens and unwinds events that have
//! outlived their timeout.
//!
//! The coordinator itself never terminates an overdue event; it only keeps
//! state durable. This task is the reconciliation loop acting on that state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::event::EventState;
use crate::lien_manager::LienManager;
use crate::store::EventStore;

/// Periodic reconciliation of expirable state.
pub struct Sweeper {
    events: Arc<dyn EventStore>,
    liens: Arc<LienManager>,
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the task to stop.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

impl Sweeper {
    pub fn new(
        events: Arc<dyn EventStore>,
        liens: Arc<LienManager>,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        Self {
            events,
            liens,
            coordinator,
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep loop on a background task.
    pub fn spawn(self) -> SweeperHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let join = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => self.sweep_once().await,
                }
            }
            info!("sweeper stopped");
        });
        SweeperHandle { token, join }
    }

    /// One reconciliation pass. Public so tests can drive it directly.
    pub async fn sweep_once(&self) {
        let now = Utc::now();

        match self.liens.expire_overdue(now).await {
            Ok(0) => {}
            Ok(n) => info!(expired = n, "expired overdue liens"),
            Err(e) => warn!(error = %e, "lien expiry sweep failed"),
        }

        let executing = match self.events.list_events_by_state(EventState::Executing).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "could not list executing events");
                return;
            }
        };

        for event in executing {
            let Some(deadline) = event.deadline() else {
                continue;
            };
            if now < deadline {
                continue;
            }
            debug!(event_id = %event.id, %deadline, "event overdue, cancelling");
            if let Err(e) = self.coordinator.cancel_event(event.id).await {
                warn!(event_id = %event.id, error = %e, "failed to cancel overdue event");
            }
        }
    }
}
