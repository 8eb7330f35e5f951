//! Single-consumer loop feeding bus envelopes to the dispatcher.

use crate::dispatcher::Dispatcher;
use forka_ipc::{Envelope, EventBus};
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct Runtime {
    inbound: broadcast::Receiver<Envelope>,
    dispatcher: Dispatcher,
}

impl Runtime {
    /// Subscribes to `bus` immediately, so envelopes published after this
    /// call are not missed even if the loop starts later.
    pub fn new(bus: &EventBus, dispatcher: Dispatcher) -> Self {
        Self {
            inbound: bus.subscribe(),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Processes envelopes one at a time until `shutdown` resolves or the
    /// bus closes. Returns the dispatcher with its accumulated state.
    pub async fn run_until<F>(mut self, shutdown: F) -> Dispatcher
    where
        F: Future<Output = ()>,
    {
        info!("Forka runtime starting...");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping dispatcher");
                    break;
                }
                result = self.inbound.recv() => {
                    match result {
                        Ok(envelope) => {
                            if let Some(outcome) = self.dispatcher.handle_envelope(&envelope).await {
                                debug!("trace_id={} outcome={:?}", envelope.trace_id, outcome);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping dispatcher");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event bus lagged by {} messages", n);
                        }
                    }
                }
            }
        }

        self.dispatcher
    }

    /// Runs until the bus closes.
    pub async fn run(self) -> Dispatcher {
        self.run_until(std::future::pending()).await
    }
}
