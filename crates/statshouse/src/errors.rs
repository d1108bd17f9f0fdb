// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the emission pipeline.

use std::io;

/// Failures of the host-supplied template evaluator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("unterminated variable reference in {0:?}")]
    Unterminated(String),

    #[error("{0}")]
    Custom(String),
}

/// A metric definition could not be turned into events.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("failed to resolve template: {0}")]
    Resolve(#[from] ResolveError),

    #[error("invalid counter value {0:?}")]
    InvalidCounter(String),

    #[error("invalid value {0:?}")]
    InvalidValue(String),

    #[error("invalid unique value {0:?}")]
    InvalidUnique(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("metric {0:?} has no value template")]
    MissingValue(String),

    #[error("invalid metric name {0:?}")]
    InvalidName(String),

    #[error("unknown dimension slot {0:?}")]
    UnknownSlot(String),

    #[error("dimension slot {0:?} is configured twice")]
    DuplicateSlot(String),

    #[error("sample percent {0} is out of range")]
    SamplePercent(u8),

    #[error("template error in metric {metric:?}: {source}")]
    Template {
        metric: String,
        #[source]
        source: ResolveError,
    },

    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send {len} bytes: {source}")]
    Send {
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// Service or endpoint construction failures.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("invalid endpoint configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("aggregation arena of {0} bytes is too small")]
    Arena(usize),
}

/// Failures of the reference batch decoder.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of batch at offset {0}")]
    Truncated(usize),

    #[error("unexpected batch tag {0:#010x}")]
    BadTag(u32),

    #[error("unsupported metric field mask {0:#x}")]
    BadFieldMask(u32),

    #[error("string at offset {0} is not valid utf-8")]
    Utf8(usize),
}
