// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::SAMPLE_LEN;
use crate::constants::{
    DEFAULT_AGGREGATE_VALUES, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_SPLITS_MAX,
    DIMENSION_NAMES, STRING_KEY_SLOT,
};
use crate::endpoint::ResolvedEndpoint;
use crate::errors::ConfigError;
use crate::metric::MetricKind;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:13337";

/// Where and how metrics are shipped.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Collector address, `host:port`
    pub address: String,
    /// Datagram buffer capacity in bytes
    pub buffer_size: usize,
    /// Flush period; also the aggregation window. 0 disables the timer.
    pub flush_interval_ms: u64,
    /// Maximum number of events one metric may split into
    pub splits_max: usize,
    /// Flush at the end of every unit of work
    pub flush_after_request: bool,
    /// Aggregation arena size in bytes; 0 disables aggregation
    pub aggregate_size: usize,
    /// Samples kept per aggregated value or unique entry
    pub aggregate_values: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            splits_max: DEFAULT_SPLITS_MAX,
            flush_after_request: false,
            aggregate_size: 0,
            aggregate_values: DEFAULT_AGGREGATE_VALUES,
        }
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidAddress {
                address: self.address.clone(),
                reason: "address cannot be empty".to_string(),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Zero("buffer_size"));
        }
        if self.splits_max == 0 {
            return Err(ConfigError::Zero("splits_max"));
        }
        // a cap of 0 aggregates counters only
        if self.aggregate_size > 0 {
            let max = self.aggregate_size / SAMPLE_LEN;
            if self.aggregate_values > max {
                return Err(ConfigError::TooLarge {
                    field: "aggregate_values",
                    value: self.aggregate_values,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Validates and resolves the address into the endpoint's identity.
    pub fn resolve(&self) -> Result<ResolvedEndpoint, ConfigError> {
        self.validate()?;
        let invalid = |reason: String| ConfigError::InvalidAddress {
            address: self.address.clone(),
            reason,
        };
        let address = self
            .address
            .trim()
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("no addresses found".to_string()))?;

        Ok(ResolvedEndpoint {
            address,
            buffer_size: self.buffer_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            splits_max: self.splits_max,
            flush_after_request: self.flush_after_request,
            aggregate_size: self.aggregate_size,
            aggregate_values: self.aggregate_values,
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// `"0"`..`"15"` or `"_s"`; `"key0"`..`"key15"` and `"skey"` also work
    pub slot: String,
    pub value: String,
    #[serde(default)]
    pub split: bool,
    /// Variable that must exist for the dimension to be enabled
    #[serde(default)]
    pub exists: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConditionConfig {
    Plain(String),
    Guarded { value: String, exists: String },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
    pub value: String,
    #[serde(default)]
    pub split: bool,
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    /// Minimum seconds between two emissions; 0 disables the limit
    #[serde(default)]
    pub timeout_secs: u64,
    /// Percentage of triggers that emit; 0 emits every time
    #[serde(default)]
    pub sample_percent: u8,
    #[serde(default)]
    pub phase: Option<String>,
}

/// A site's endpoint: either a destination or `"off"`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SiteEndpoint {
    Off(Off),
    Endpoint(EndpointConfig),
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Off {
    Off,
}

/// A group of metrics sharing one endpoint, such as one HTTP location.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub name: String,
    #[serde(default)]
    pub endpoint: Option<SiteEndpoint>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

impl SiteConfig {
    #[must_use]
    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        match &self.endpoint {
            Some(SiteEndpoint::Endpoint(config)) => Some(config),
            Some(SiteEndpoint::Off(_)) | None => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for site in &self.sites {
            if let Some(endpoint) = site.endpoint() {
                endpoint.validate()?;
            }
        }
        Ok(())
    }
}

/// Maps a configured slot name to its dimension index.
#[must_use]
pub fn slot_index(slot: &str) -> Option<usize> {
    if slot == "skey" {
        return Some(STRING_KEY_SLOT);
    }
    let name = slot.strip_prefix("key").unwrap_or(slot);
    DIMENSION_NAMES.iter().position(|n| *n == name)
}
