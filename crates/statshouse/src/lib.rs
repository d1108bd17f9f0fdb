// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # StatsHouse emission pipeline
//!
//! Turns configured metric templates into StatsHouse UDP datagrams.
//!
//! - [`definition`] and [`compiler`]: templates compiled once, evaluated per
//!   unit of work into [`metric::MetricEvent`]s
//! - [`aggregate`]: optional per-endpoint cache that merges equal events over
//!   the flush interval, backed by the [`arena`] ring allocator
//! - [`wire`] and [`transport`]: the binary batch encoding and the buffered,
//!   lazily connected UDP sender
//! - [`endpoint`], [`service`] and [`emitter`]: endpoint sharing, the async
//!   driver owning each endpoint, and the per-request trigger

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregate;
pub mod arena;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod definition;
pub mod emitter;
pub mod endpoint;
pub mod errors;
pub mod interpolate;
pub mod metric;
pub mod service;
pub mod split;
pub mod template;
pub mod timer;
pub mod transport;
pub mod util;
pub mod wire;
