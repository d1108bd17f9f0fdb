// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use ustr::Ustr;

use crate::config::{slot_index, ConditionConfig, MetricConfig};
use crate::constants::{DIMENSION_NAMES, MAX_DIMENSIONS};
use crate::errors::ConfigError;
use crate::metric::MetricKind;
use crate::template::TemplateCompiler;
use crate::util::parse_metric_name;

#[derive(Clone, Debug)]
pub struct ValueTemplate<T> {
    pub kind: MetricKind,
    pub template: T,
    pub split: bool,
}

#[derive(Clone, Debug)]
pub struct DimensionTemplate<T> {
    pub name: Ustr,
    pub template: T,
    pub split: bool,
    /// Set when the dimension's exists guard failed at load time.
    pub disabled: bool,
}

/// A configured metric: templates compiled once, evaluated per unit of work.
#[derive(Clone, Debug)]
pub struct MetricDefinition<T> {
    pub name: Ustr,
    pub value: ValueTemplate<T>,
    pub dimensions: [Option<DimensionTemplate<T>>; MAX_DIMENSIONS],
    pub conditions: Vec<T>,
    pub min_interval: Duration,
    /// Percentage of triggers that emit; 0 emits on every trigger.
    pub sample_percent: u8,
    pub phase: Option<String>,
    pub last_emission: Option<Instant>,
}

impl<T> MetricDefinition<T> {
    #[must_use]
    pub fn new(name: &str, kind: MetricKind, template: T) -> Self {
        MetricDefinition {
            name: Ustr::from(name),
            value: ValueTemplate {
                kind,
                template,
                split: false,
            },
            dimensions: std::array::from_fn(|_| None),
            conditions: Vec::new(),
            min_interval: Duration::ZERO,
            sample_percent: 0,
            phase: None,
            last_emission: None,
        }
    }

    #[must_use]
    pub fn split_value(mut self) -> Self {
        self.value.split = true;
        self
    }

    /// Configures dimension `slot`, named after the collector's key for it.
    /// Out of range slots are ignored.
    #[must_use]
    pub fn with_dimension(mut self, slot: usize, template: T, split: bool) -> Self {
        if let Some(dimension) = self.dimensions.get_mut(slot) {
            *dimension = Some(DimensionTemplate {
                name: Ustr::from(DIMENSION_NAMES[slot]),
                template,
                split,
                disabled: false,
            });
        }
        self
    }

    #[must_use]
    pub fn with_condition(mut self, template: T) -> Self {
        self.conditions.push(template);
        self
    }

    #[must_use]
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    #[must_use]
    pub fn with_sample_percent(mut self, percent: u8) -> Self {
        self.sample_percent = percent;
        self
    }

    #[must_use]
    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.value.kind
    }

    /// Untagged definitions only fire on the untagged trigger, tagged ones
    /// only on a trigger with the same tag.
    #[must_use]
    pub fn matches_phase(&self, phase: Option<&str>) -> bool {
        self.phase.as_deref() == phase
    }

    /// Compiles `config` with `compiler`. Failed exists guards disable the
    /// dimension or drop the condition instead of failing the load.
    pub fn from_config<C>(config: &MetricConfig, compiler: &C) -> Result<Self, ConfigError>
    where
        C: TemplateCompiler<Template = T>,
    {
        let name = parse_metric_name(&config.name)
            .ok_or_else(|| ConfigError::InvalidName(config.name.clone()))?;
        if config.value.is_empty() {
            return Err(ConfigError::MissingValue(name));
        }
        if config.sample_percent > 100 {
            return Err(ConfigError::SamplePercent(config.sample_percent));
        }

        let compile = |source: &str| {
            compiler
                .compile(source)
                .map_err(|source| ConfigError::Template {
                    metric: name.clone(),
                    source,
                })
        };

        let mut definition = MetricDefinition::new(&name, config.kind, compile(&config.value)?);
        definition.value.split = config.split;
        definition.min_interval = Duration::from_secs(config.timeout_secs);
        definition.sample_percent = config.sample_percent;
        definition.phase = config.phase.clone().filter(|p| !p.is_empty());

        let mut seen = HashSet::new();
        for key in &config.keys {
            let slot =
                slot_index(&key.slot).ok_or_else(|| ConfigError::UnknownSlot(key.slot.clone()))?;
            if !seen.insert(slot) {
                return Err(ConfigError::DuplicateSlot(key.slot.clone()));
            }
            let disabled = match &key.exists {
                Some(variable) if !compiler.exists(variable) => {
                    debug!(
                        "Disabling dimension {} of {}: {} does not exist",
                        key.slot, name, variable
                    );
                    true
                }
                _ => false,
            };
            definition = definition.with_dimension(slot, compile(&key.value)?, key.split);
            if let Some(dimension) = definition.dimensions[slot].as_mut() {
                dimension.disabled = disabled;
            }
        }

        for condition in &config.conditions {
            let (source, exists) = match condition {
                ConditionConfig::Plain(source) => (source, None),
                ConditionConfig::Guarded { value, exists } => (value, Some(exists)),
            };
            if let Some(variable) = exists {
                if !compiler.exists(variable) {
                    debug!("Dropping condition {:?} of {}: {} does not exist", source, name, variable);
                    continue;
                }
            }
            definition.conditions.push(compile(source)?);
        }

        Ok(definition)
    }
}
