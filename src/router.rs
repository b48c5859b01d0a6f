// ABOUTME: Background poll loop: polls every site, drops repeats, hands events to the dispatcher
// ABOUTME: Stops when its shutdown token is cancelled

use crate::poller::EventPoller;
use sechat_core::{CommandDispatcher, RecentEventWindow};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct EventRouter {
    pollers: Vec<Arc<EventPoller>>,
    dispatcher: Arc<CommandDispatcher>,
    recent: RecentEventWindow,
    interval: Duration,
}

impl EventRouter {
    pub fn new(
        pollers: Vec<Arc<EventPoller>>,
        dispatcher: Arc<CommandDispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            pollers,
            dispatcher,
            recent: RecentEventWindow::default(),
            interval,
        }
    }

    /// Poll every site once and dispatch what is new. Returns the number of
    /// events forwarded to the dispatcher.
    pub async fn run_cycle(&mut self) -> usize {
        let mut events = Vec::new();
        for poller in &self.pollers {
            events.extend(poller.poll().await);
        }

        let mut forwarded = 0;
        for event in events {
            if !self.recent.check_and_record(event.id) {
                tracing::debug!(site = %event.site, event_id = event.id, "Skipping repeated event");
                continue;
            }
            let outcome = self.dispatcher.handle(event).await;
            tracing::trace!(outcome = ?outcome, "Dispatched event");
            forwarded += 1;
        }
        forwarded
    }

    /// Run cycles every `interval` until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            sites = self.pollers.len(),
            interval_secs = self.interval.as_secs(),
            "Event router started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        tracing::info!("Event router stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
