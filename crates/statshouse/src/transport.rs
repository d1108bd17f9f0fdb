// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output buffer, datagram socket and flush timer of one endpoint.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::errors::TransportError;
use crate::metric::MetricEvent;
use crate::timer::Deadline;
use crate::wire;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Buffered,
    /// The record cannot fit even in an empty buffer.
    TooBig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Sent(usize),
    /// Nothing was sent; the buffered bytes are kept for the next attempt.
    Failed,
}

impl FlushOutcome {
    /// Combines two consecutive flushes. A failure wins over anything sent.
    #[must_use]
    pub fn and(self, next: FlushOutcome) -> FlushOutcome {
        match (self, next) {
            (FlushOutcome::Failed, _) | (_, FlushOutcome::Failed) => FlushOutcome::Failed,
            (FlushOutcome::Sent(a), FlushOutcome::Sent(b)) => FlushOutcome::Sent(a + b),
            (FlushOutcome::Sent(n), FlushOutcome::Empty)
            | (FlushOutcome::Empty, FlushOutcome::Sent(n)) => FlushOutcome::Sent(n),
            (FlushOutcome::Empty, FlushOutcome::Empty) => FlushOutcome::Empty,
        }
    }
}

#[derive(Debug)]
pub struct Transport {
    address: SocketAddr,
    buffer: Vec<u8>,
    capacity: usize,
    socket: Option<UdpSocket>,
    flush_interval: Duration,
    timer: Deadline,
}

impl Transport {
    #[must_use]
    pub fn new(address: SocketAddr, capacity: usize, flush_interval: Duration) -> Self {
        Transport {
            address,
            buffer: Vec::with_capacity(capacity),
            capacity,
            socket: None,
            flush_interval,
            timer: Deadline::default(),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.at()
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    /// Appends `event` as a record of its own, flushing first when the
    /// buffer cannot take it. Records are never split across datagrams.
    pub fn send(&mut self, event: &MetricEvent, now: Instant, exiting: bool) -> SendOutcome {
        let size = wire::record_len(event);
        trace!("Encoding {} bytes for {}", size, event.name);

        if self.remaining() < size {
            self.flush(exiting);
            if self.remaining() < size {
                warn!(
                    "Dropping metric {}: {} bytes is too big for a {} byte buffer",
                    event.name, size, self.capacity
                );
                return SendOutcome::TooBig;
            }
        }

        wire::write_record(&mut self.buffer, event);
        self.arm_timer(now, exiting);
        SendOutcome::Buffered
    }

    fn arm_timer(&mut self, now: Instant, exiting: bool) {
        if self.flush_interval.is_zero() || self.buffer.is_empty() || exiting {
            return;
        }
        self.timer.arm(now + self.flush_interval);
    }

    fn open(address: SocketAddr) -> Result<UdpSocket, TransportError> {
        let bind: SocketAddr = match address {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)
            .and_then(|socket| socket.set_nonblocking(true).map(|()| socket))
            .and_then(|socket| socket.connect(address).map(|()| socket))
            .map_err(|source| TransportError::Connect { address, source })?;
        debug!("Connected to {}", address);
        Ok(socket)
    }

    fn try_send(&mut self) -> Result<usize, TransportError> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => Self::open(self.address)?,
        };
        let socket = self.socket.insert(socket);
        socket
            .send(&self.buffer)
            .map_err(|source| TransportError::Send {
                len: self.buffer.len(),
                source,
            })
    }

    /// Sends the buffered records as one datagram. A failure drops the
    /// connection and keeps the bytes; there is no retry within the call.
    pub fn flush(&mut self, exiting: bool) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        match self.try_send() {
            Ok(sent) => {
                debug!("Sent {} bytes to {}", sent, self.address);
                if exiting {
                    self.close();
                }
                self.buffer.clear();
                FlushOutcome::Sent(sent)
            }
            Err(e @ TransportError::Connect { .. }) => {
                error!("{}", e);
                self.close();
                FlushOutcome::Failed
            }
            Err(e) => {
                debug!("Flush to {} failed: {}", self.address, e);
                self.close();
                FlushOutcome::Failed
            }
        }
    }

    /// Flushes when the timer is due and rearms it if bytes remain.
    pub fn on_timer(&mut self, now: Instant, exiting: bool) -> FlushOutcome {
        if !self.timer.is_due(now) {
            return FlushOutcome::Empty;
        }
        self.timer.disarm();
        let outcome = self.flush(exiting);
        self.arm_timer(now, exiting);
        outcome
    }

    pub fn cancel_timer(&mut self) {
        self.timer.disarm();
    }

    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed connection to {}", self.address);
        }
    }
}
