//! Fixed-interval polling loop around a [`Consumer`].
//!
//! Each tick runs to completion before the next is scheduled, so a worker
//! never handles two messages at once. Cancellation is checked between
//! ticks only; a tick in flight finishes its message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consumer::{Consumer, TickOutcome};
use crate::registry::WorkerRegistry;

/// Drives one consumer on a fixed interval until cancelled.
pub struct PollingWorker {
    consumer: Arc<dyn Consumer>,
    interval: Duration,
    registry: Arc<WorkerRegistry>,
}

impl PollingWorker {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        interval: Duration,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        registry.register(consumer.name(), consumer.queue_name());
        Self {
            consumer,
            interval,
            registry,
        }
    }

    /// Run one tick and record it in the registry.
    pub async fn tick_once(&self) -> Option<TickOutcome> {
        let name = self.consumer.name();
        self.registry.record_start(name);
        let start = Instant::now();
        let result = self.consumer.tick().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                self.registry.record_tick(name, Ok(&outcome), duration_ms);
                Some(outcome)
            }
            Err(e) => {
                error!(worker = %name, error = %e, "Tick failed");
                self.registry.record_tick(name, Err(e.to_string()), duration_ms);
                None
            }
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.consumer.name().to_string();
        info!(
            worker = %name,
            queue = %self.consumer.queue_name(),
            interval_ms = self.interval.as_millis() as u64,
            "Worker started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }

        info!(worker = %name, "Worker stopped");
    }

    /// Run on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
