use std::{future::Future, sync::Arc, time::Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    app_context::AppContext,
    errors::ConsumerError,
    metrics_consts::{
        MESSAGES_DROPPED, MESSAGES_RECEIVED, MESSAGE_PROCESSING_TIME, RECORDS_STORED,
        RENDER_FAILED,
    },
    source::{Delivery, SourceEvent, TopicConnector},
    types::RecordId,
    validator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Unstarted,
    Verifying,
    Subscribed,
    Running,
    /// Terminal, after a shutdown request or the end of a finite source
    Stopped,
    /// Terminal, after any startup, storage or transport error
    Failed,
}

impl ConsumerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConsumerState::Stopped | ConsumerState::Failed)
    }
}

/// Pulls messages one at a time and runs each one through validation, storage
/// and projection recompute before asking for the next. Store order therefore
/// matches delivery order, and the projections handed to the sink after message
/// N cover exactly the records up to N.
pub struct SongConsumerLoop {
    context: Arc<AppContext>,
    connector: Arc<dyn TopicConnector>,
    state: watch::Sender<ConsumerState>,
}

impl SongConsumerLoop {
    pub fn new(context: Arc<AppContext>, connector: Arc<dyn TopicConnector>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Unstarted);
        Self {
            context,
            connector,
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Runs until `shutdown` flips to true (or its sender goes away), the source
    /// ends, or something fatal happens. Consumes the loop, so the store is
    /// prepared at most once.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        match self.run_to_completion(&mut shutdown).await {
            Ok(()) => {
                self.transition(ConsumerState::Stopped);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, exit_code = e.exit_code(), "consumer failed");
                self.transition(ConsumerState::Failed);
                Err(e)
            }
        }
    }

    async fn run_to_completion(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConsumerError> {
        self.transition(ConsumerState::Verifying);
        let Some(verified) = unless_shutdown(shutdown, self.connector.verify()).await else {
            return Ok(());
        };
        verified?;

        let Some(source) = unless_shutdown(shutdown, self.connector.subscribe()).await else {
            return Ok(());
        };
        let mut source = source?;
        self.transition(ConsumerState::Subscribed);

        // Nothing touches the store until the topic is known to be consumable,
        // and a run cancelled during startup must not wipe the previous one
        if shutdown_pending(shutdown) {
            info!("Shutdown requested during startup, leaving the store as it was");
            return Ok(());
        }
        self.context.prepare_store().await?;

        self.transition(ConsumerState::Running);
        info!("Starting consumer loop");

        loop {
            if *shutdown.borrow_and_update() {
                info!("Shutdown signal received, stopping consumer loop");
                break;
            }

            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, stopping consumer loop");
                        break;
                    }
                    continue;
                }
                event = source.next() => event?,
            };

            let delivery = match event {
                SourceEvent::Message(delivery) => delivery,
                SourceEvent::EndOfStream => {
                    info!("Message source exhausted, stopping consumer loop");
                    break;
                }
            };

            self.handle_delivery(&delivery).await?;
            source.complete(&delivery).await?;
        }

        Ok(())
    }

    /// Returns the id the message was stored under, or None if it was dropped.
    async fn handle_delivery(&self, delivery: &Delivery) -> Result<Option<RecordId>, ConsumerError> {
        let start = Instant::now();
        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        let validated = validator::decode(delivery.payload.as_deref())
            .and_then(|raw| validator::validate(&raw));

        let record = match validated {
            Ok(record) => record,
            Err(e) => {
                metrics::counter!(MESSAGES_DROPPED, &[("reason", e.reason())]).increment(1);
                warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "dropping invalid message"
                );
                return Ok(None);
            }
        };

        let id = self.context.store.append(&record).await?;
        metrics::counter!(RECORDS_STORED).increment(1);
        info!(id = id.0, ?record, "stored song");

        let projections = self.context.engine.recompute_all(&self.context.store).await?;
        if let Err(e) = self.context.sink.render(&projections).await {
            metrics::counter!(RENDER_FAILED).increment(1);
            warn!(error = %e, "failed to render projections");
        }

        metrics::histogram!(MESSAGE_PROCESSING_TIME).record(start.elapsed().as_millis() as f64);
        Ok(Some(id))
    }

    fn transition(&self, to: ConsumerState) {
        let from = self.state.send_replace(to);
        info!(?from, ?to, "consumer state changed");
    }
}

/// Resolves once shutdown is requested, either explicitly or by the sender going away.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        info!("Shutdown channel closed during startup");
    } else {
        info!("Shutdown signal received during startup");
    }
}

fn shutdown_pending(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Drives `step` unless shutdown is requested first, in which case the step is
/// dropped and None is returned.
async fn unless_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    step: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => None,
        output = step => Some(output),
    }
}
