use std::sync::Arc;

use async_trait::async_trait;
use ops_api::Result;
use ops_core::{EventFrame, PeriodicJob};
use ops_logtail::LogTailer;
use ops_router::CommandRouter;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use crate::handler::OpsCommandHandler;

/// How often a per-server log is polled for new `!command` lines, matching
/// the original bot's `@tasks.loop(seconds=5)` chat-command scanner.
const LOG_TAIL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Adapts a [`LogTailer`] + [`CommandRouter`] pair into a [`PeriodicJob`].
/// Lives here rather than in `ops-logtail` or `ops-router` because neither
/// of those foreign types can host the impl — this newtype is local to the
/// crate that needs it, satisfying the orphan rule.
pub struct LogTailerJob {
    server_name: String,
    tailer: Mutex<LogTailer>,
    router: Arc<CommandRouter<OpsCommandHandler>>,
}

impl LogTailerJob {
    pub fn new(server_name: String, log_path: String, router: Arc<CommandRouter<OpsCommandHandler>>) -> Self {
        Self {
            server_name,
            tailer: Mutex::new(LogTailer::new(log_path, 0)),
            router,
        }
    }
}

#[async_trait]
impl PeriodicJob for LogTailerJob {
    fn name(&self) -> &str {
        &self.server_name
    }

    fn interval(&self) -> std::time::Duration {
        LOG_TAIL_INTERVAL
    }

    async fn tick(&self) -> Result<()> {
        let lines = self.tailer.lock().await.read_new_lines().await?;
        for line in lines {
            self.router.dispatch_line(&self.server_name, &line);
        }
        Ok(())
    }
}

/// Local seam over `RewardConsumer`/`GuildSyncConsumer`'s identical
/// `handle(&EventFrame) -> Result<()>` shape, so one loop below drives
/// both without either depending on the other or on `ops-server`.
#[async_trait]
pub trait EventConsumerT: Send + Sync {
    async fn handle(&self, frame: &EventFrame) -> Result<()>;
}

#[async_trait]
impl EventConsumerT for ops_status::RewardConsumer {
    async fn handle(&self, frame: &EventFrame) -> Result<()> {
        ops_status::RewardConsumer::handle(self, frame).await
    }
}

#[async_trait]
impl EventConsumerT for ops_status::GuildSyncConsumer {
    async fn handle(&self, frame: &EventFrame) -> Result<()> {
        ops_status::GuildSyncConsumer::handle(self, frame).await
    }
}

/// Feeds every frame from `events` to `consumer` until `shutdown` fires or
/// the channel closes. A `Lagged` error only means this consumer missed
/// some frames — the next tick's frame still arrives, so the loop just
/// keeps going.
pub async fn run_consumer(
    consumer: Arc<dyn EventConsumerT>,
    mut events: broadcast::Receiver<EventFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = events.recv() => match frame {
                Ok(frame) => {
                    if let Err(e) = consumer.handle(&frame).await {
                        warn!("event consumer failed: {e}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagged behind the status tick");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Drives every [`PeriodicJob`] on its own interval until `shutdown` fires,
/// one `tokio::spawn`ed task per job, matching design note §9: one place
/// that logs, sleeps, and swallows a residual tick error rather than four
/// bespoke loops with duplicated retry/log boilerplate.
pub async fn run_periodic(job: Arc<dyn PeriodicJob>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(job.interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = job.tick().await {
                    warn!(job = job.name(), "tick failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(job = job.name(), "shutting down");
                    return;
                }
            }
        }
    }
}
