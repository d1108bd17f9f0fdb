// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::hash::BuildHasherDefault;
use std::net::SocketAddr;
use std::time::Duration;

use fnv::FnvHasher;
use hashbrown::HashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::aggregate::{AggregateCache, FlushSink, Ingest, ENTRY_OVERHEAD};
use crate::errors::Creation;
use crate::metric::MetricEvent;
use crate::service::{EndpointHandle, EndpointService};
use crate::timer::earliest;
use crate::transport::{FlushOutcome, SendOutcome, Transport};

/// The full identity of an endpoint. Sites with equal settings share one
/// socket, buffer and cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedEndpoint {
    pub address: SocketAddr,
    pub buffer_size: usize,
    pub flush_interval: Duration,
    pub splits_max: usize,
    pub flush_after_request: bool,
    pub aggregate_size: usize,
    pub aggregate_values: usize,
}

/// Hands reclaimed entries to the transport; a finished reclaim pass flushes.
struct Forward<'a> {
    transport: &'a mut Transport,
    now: Instant,
    exiting: bool,
    flushed: FlushOutcome,
}

impl<'a> Forward<'a> {
    fn new(transport: &'a mut Transport, now: Instant, exiting: bool) -> Self {
        Forward {
            transport,
            now,
            exiting,
            flushed: FlushOutcome::Empty,
        }
    }
}

impl FlushSink for Forward<'_> {
    fn flush_event(&mut self, event: &MetricEvent) {
        self.transport.send(event, self.now, self.exiting);
    }

    fn batch_complete(&mut self) {
        let outcome = self.transport.flush(self.exiting);
        self.flushed = self.flushed.and(outcome);
    }
}

#[derive(Debug)]
pub struct Endpoint {
    config: ResolvedEndpoint,
    transport: Transport,
    aggregate: Option<AggregateCache>,
    exiting: bool,
}

impl Endpoint {
    pub fn new(config: ResolvedEndpoint) -> Result<Self, Creation> {
        let aggregate = match config.aggregate_size {
            0 => None,
            size if size <= ENTRY_OVERHEAD => return Err(Creation::Arena(size)),
            size => Some(AggregateCache::new(
                size,
                config.flush_interval,
                config.aggregate_values,
            )),
        };
        let transport = Transport::new(config.address, config.buffer_size, config.flush_interval);
        Ok(Endpoint {
            config,
            transport,
            aggregate,
            exiting: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResolvedEndpoint {
        &self.config
    }

    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Bytes waiting in the datagram buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.transport.pending()
    }

    /// Entries waiting in the aggregation cache.
    #[must_use]
    pub fn aggregated(&self) -> usize {
        self.aggregate.as_ref().map_or(0, AggregateCache::len)
    }

    /// Offers `event` to the cache first; anything it does not take goes
    /// straight into the datagram buffer.
    pub fn send(&mut self, event: &MetricEvent, now: Instant) -> SendOutcome {
        let exiting = self.exiting;
        if let Some(cache) = self.aggregate.as_mut() {
            let mut sink = Forward::new(&mut self.transport, now, exiting);
            match cache.ingest(event, now, exiting, &mut sink) {
                Ingest::Merged | Ingest::Buffered => return SendOutcome::Buffered,
                Ingest::Rejected => trace!("Sending {} without aggregation", event.name),
            }
        }
        self.transport.send(event, now, exiting)
    }

    pub fn flush(&mut self) -> FlushOutcome {
        self.transport.flush(self.exiting)
    }

    /// End of a unit of work. Flushes only when the endpoint asks for it.
    pub fn flush_after_request(&mut self) -> FlushOutcome {
        if !self.config.flush_after_request {
            return FlushOutcome::Empty;
        }
        self.flush()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(
            self.transport.next_deadline(),
            self.aggregate.as_ref().and_then(AggregateCache::next_deadline),
        )
    }

    /// Runs whichever timers are due at `now`.
    pub fn on_timer(&mut self, now: Instant) {
        let exiting = self.exiting;
        if let Some(cache) = self.aggregate.as_mut() {
            let mut sink = Forward::new(&mut self.transport, now, exiting);
            cache.on_timer(now, &mut sink);
        }
        self.transport.on_timer(now, exiting);
    }

    /// Drains the cache, sends what is buffered and closes the socket.
    /// Further sends bypass aggregation. The outcome covers everything sent
    /// here, drained entries included.
    pub fn shutdown(&mut self, now: Instant) -> FlushOutcome {
        self.exiting = true;
        self.transport.cancel_timer();
        let mut outcome = FlushOutcome::Empty;
        if let Some(cache) = self.aggregate.as_mut() {
            let mut sink = Forward::new(&mut self.transport, now, true);
            let drained = cache.drain(now, &mut sink);
            if drained > 0 {
                debug!("Drained {} aggregated metrics on shutdown", drained);
            }
            outcome = sink.flushed;
        }
        if self.transport.pending() > 0 {
            outcome = outcome.and(self.transport.flush(true));
        }
        self.transport.close();
        outcome
    }
}

type EndpointMap = HashMap<ResolvedEndpoint, EndpointHandle, BuildHasherDefault<FnvHasher>>;

/// Deduplicates endpoints by their resolved settings. New endpoints yield a
/// service that the caller must spawn.
#[derive(Default)]
pub struct EndpointRegistry {
    handles: EndpointMap,
    services: Vec<EndpointService>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `config`, creating the endpoint on first use.
    pub fn get_or_create(&mut self, config: ResolvedEndpoint) -> Result<EndpointHandle, Creation> {
        if let Some(handle) = self.handles.get(&config) {
            return Ok(handle.clone());
        }
        debug!("Creating endpoint for {}", config.address);
        let (service, handle) = EndpointService::new(Endpoint::new(config.clone())?);
        self.services.push(service);
        self.handles.insert(config, handle.clone());
        Ok(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Services created since the last call.
    pub fn take_services(&mut self) -> Vec<EndpointService> {
        std::mem::take(&mut self.services)
    }
}
