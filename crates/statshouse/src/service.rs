// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::endpoint::Endpoint;
use crate::metric::MetricEvent;
use crate::timer::sleep_until_deadline;
use crate::transport::{FlushOutcome, SendOutcome};

#[derive(Debug)]
pub enum EndpointCommand {
    SendBatch(Vec<MetricEvent>),
    FlushAfterRequest,
    Flush(oneshot::Sender<FlushOutcome>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct EndpointHandle {
    tx: mpsc::UnboundedSender<EndpointCommand>,
    splits_max: usize,
    flush_after_request: bool,
}

impl EndpointHandle {
    /// Upper bound on the events one definition may compile into.
    #[must_use]
    pub fn splits_max(&self) -> usize {
        self.splits_max
    }

    pub fn send_batch(
        &self,
        events: Vec<MetricEvent>,
    ) -> Result<(), mpsc::error::SendError<EndpointCommand>> {
        self.tx.send(EndpointCommand::SendBatch(events))
    }

    /// No-op unless the endpoint was configured to flush after every request.
    pub fn flush_after_request(&self) -> Result<(), mpsc::error::SendError<EndpointCommand>> {
        if !self.flush_after_request {
            return Ok(());
        }
        self.tx.send(EndpointCommand::FlushAfterRequest)
    }

    pub async fn flush(&self) -> Result<FlushOutcome, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(EndpointCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<EndpointCommand>> {
        self.tx.send(EndpointCommand::Shutdown)
    }
}

/// Single owner of an [`Endpoint`]. Commands and timers are processed one at
/// a time, so the endpoint needs no locking.
pub struct EndpointService {
    endpoint: Endpoint,
    rx: mpsc::UnboundedReceiver<EndpointCommand>,
    cancel_token: CancellationToken,
}

impl EndpointService {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> (Self, EndpointHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EndpointHandle {
            tx,
            splits_max: endpoint.config().splits_max,
            flush_after_request: endpoint.config().flush_after_request,
        };
        let service = Self {
            endpoint,
            rx,
            cancel_token: CancellationToken::new(),
        };
        (service, handle)
    }

    /// Cancelling the token has the same effect as [`EndpointHandle::shutdown`].
    #[must_use]
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn send_batch(&mut self, events: Vec<MetricEvent>) {
        let now = Instant::now();
        let mut dropped = 0;
        for event in &events {
            if self.endpoint.send(event, now) == SendOutcome::TooBig {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("Total of {} metrics were too big to send", dropped);
        }
    }

    /// Returns false once the service should stop.
    fn handle_command(&mut self, command: EndpointCommand) -> bool {
        match command {
            EndpointCommand::SendBatch(events) => self.send_batch(events),
            EndpointCommand::FlushAfterRequest => {
                self.endpoint.flush_after_request();
            }
            EndpointCommand::Flush(response_tx) => {
                let outcome = self.endpoint.flush();
                if response_tx.send(outcome).is_err() {
                    error!("Failed to send flush response - receiver dropped");
                }
            }
            EndpointCommand::Shutdown => return false,
        }
        true
    }

    pub async fn run(mut self) {
        let address = self.endpoint.config().address;
        debug!("Endpoint service for {} started", address);

        loop {
            let deadline = self.endpoint.next_deadline();
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("Endpoint service for {} cancelled", address);
                    // commands queued before cancellation still reach the endpoint
                    self.rx.close();
                    while let Ok(command) = self.rx.try_recv() {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    break;
                }
                command = self.rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            debug!("Endpoint service for {} shutting down", address);
                            break;
                        }
                    }
                    None => {
                        debug!("Endpoint service for {} shutting down", address);
                        break;
                    }
                },
                () = sleep_until_deadline(deadline) => {
                    self.endpoint.on_timer(Instant::now());
                }
            }
        }

        self.endpoint.shutdown(Instant::now());
        debug!("Endpoint service for {} stopped", address);
    }
}
