//! Lifecycle of the per-tuple polling tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::adapter::AdapterRegistry;
use crate::config::Config;
use crate::model::TupleId;
use crate::poller::{FeedPoller, PollerContext};
use crate::recovery::{RecoverySummary, recover};
use crate::retry::RetryPolicy;
use crate::store::VehicleStore;
use crate::token::TokenManager;

struct Running {
    cancel: CancellationToken,
    tasks: Vec<(TupleId, JoinHandle<()>)>,
}

/// Owns one periodic task per enabled (operator, feed kind, feed index).
///
/// Each task runs its cycle inline on a `Skip` interval, so a slow cycle
/// delays the next tick instead of overlapping it.
pub struct Scheduler {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn VehicleStore>,
    tokens: Arc<TokenManager>,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn VehicleStore>) -> Self {
        Self {
            registry,
            store,
            tokens: Arc::new(TokenManager::new()),
            running: None,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Builds a poller for every enabled tuple. Operators whose adapter cannot
    /// be resolved are logged once and left out.
    pub fn build_pollers(&self, config: &Config) -> Vec<FeedPoller> {
        let ctx = Arc::new(PollerContext {
            tokens: self.tokens.clone(),
            store: self.store.clone(),
            retry: RetryPolicy::from(&config.retry),
            vehicle_ttl: Duration::from_secs(config.vehicle_ttl_seconds),
            trip_history_len: config.trip_history_len,
        });

        let mut pollers = Vec::new();
        for operator in config.operators.iter().filter(|op| op.enable) {
            let adapter = match self.registry.resolve(operator) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(operator = %operator.slug, error = %e, "No adapter for operator, its feeds will not be polled");
                    continue;
                }
            };

            for (kind, index, feed) in operator.enabled_feeds() {
                let interval = config.polling_interval(operator, &feed);
                pollers.push(FeedPoller::new(
                    TupleId::new(operator.slug.clone(), kind, index),
                    feed,
                    interval,
                    adapter.clone(),
                    ctx.clone(),
                ));
            }
        }
        pollers
    }

    /// Starts polling every enabled tuple, running startup recovery first when
    /// `with_recovery` is set. Recovery already fetched or found fresh data for
    /// every tuple, so the loops then wait one interval before their first
    /// cycle; without it they poll immediately. Any tasks from a previous start
    /// are stopped.
    pub async fn start(&mut self, config: &Config, with_recovery: bool) -> Option<RecoverySummary> {
        if self.running.is_some() {
            self.stop_all().await;
        }

        let mut pollers = self.build_pollers(config);
        let summary = if with_recovery {
            Some(recover(&mut pollers, config.recovery_max_age_minutes).await)
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let tasks: Vec<_> = pollers
            .into_iter()
            .map(|poller| {
                let id = poller.id().clone();
                let span = tracing::info_span!(
                    "tuple",
                    operator = %id.operator,
                    feed = %id.kind,
                    index = id.index,
                );
                let handle = tokio::spawn(run_loop(poller, with_recovery, cancel.clone()).instrument(span));
                (id, handle)
            })
            .collect();

        info!(tuples = tasks.len(), "Polling started");
        self.running = Some(Running { cancel, tasks });
        summary
    }

    /// Cancels every task and waits for in-flight cycles to finish.
    pub async fn stop_all(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();

        let count = running.tasks.len();
        for (id, handle) in running.tasks {
            if let Err(e) = handle.await {
                error!(tuple = %id, error = %e, "Polling task ended abnormally");
            }
        }
        info!(tuples = count, "Polling stopped");
    }

    pub async fn restart(&mut self, config: &Config, with_recovery: bool) -> Option<RecoverySummary> {
        self.stop_all().await;
        self.start(config, with_recovery).await
    }

    /// Tuples with a live polling task.
    pub fn active_tuples(&self) -> Vec<TupleId> {
        self.running
            .as_ref()
            .map(|running| {
                running
                    .tasks
                    .iter()
                    .filter(|(_, handle)| !handle.is_finished())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

async fn run_loop(mut poller: FeedPoller, delay_first: bool, cancel: CancellationToken) {
    let period = poller.interval();
    let mut ticker = if delay_first {
        tokio::time::interval_at(Instant::now() + period, period)
    } else {
        tokio::time::interval(period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(interval_secs = period.as_secs(), delay_first, "Polling loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // not raced against cancellation: an in-flight cycle always completes
                poller.poll_once().await;
            }
        }
    }
    debug!("Polling loop stopped");
}
