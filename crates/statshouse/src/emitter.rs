// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use derive_more::Display;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::compiler::compile;
use crate::config::PipelineConfig;
use crate::definition::MetricDefinition;
use crate::endpoint::EndpointRegistry;
use crate::errors::Creation;
use crate::metric::MetricEvent;
use crate::service::{EndpointHandle, EndpointService};
use crate::template::{TemplateCompiler, ValueResolver};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("site#{_0}")]
pub struct SiteId(usize);

/// Metrics evaluated together, such as those of one HTTP location. A site
/// without an endpoint is switched off.
#[derive(Debug)]
pub struct Site<T> {
    pub name: String,
    pub definitions: Vec<MetricDefinition<T>>,
    pub endpoint: Option<EndpointHandle>,
}

/// What one trigger did with a site's definitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Events handed to the endpoint
    pub events: usize,
    /// Definitions that produced nothing
    pub declined: usize,
    /// Definitions whose evaluation failed
    pub failed: usize,
}

pub struct Emitter<T> {
    sites: Vec<Site<T>>,
    rng: StdRng,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Emitter<T> {
    #[must_use]
    pub fn new() -> Self {
        Emitter {
            sites: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Makes sampling reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn add_site(
        &mut self,
        name: &str,
        definitions: Vec<MetricDefinition<T>>,
        endpoint: Option<EndpointHandle>,
    ) -> SiteId {
        self.sites.push(Site {
            name: name.to_string(),
            definitions,
            endpoint,
        });
        SiteId(self.sites.len() - 1)
    }

    /// Builds every site of `config`. Sites with equal endpoint settings
    /// share one endpoint; the returned services must be spawned.
    pub fn from_config<C>(
        config: &PipelineConfig,
        compiler: &C,
    ) -> Result<(Self, Vec<EndpointService>), Creation>
    where
        C: TemplateCompiler<Template = T>,
    {
        let mut emitter = Emitter::new();
        let mut registry = EndpointRegistry::new();

        for site in &config.sites {
            let endpoint = match site.endpoint() {
                Some(endpoint) => Some(registry.get_or_create(endpoint.resolve()?)?),
                None => None,
            };
            let definitions = site
                .metrics
                .iter()
                .map(|metric| MetricDefinition::from_config(metric, compiler))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(
                "Loaded site {} with {} metrics",
                site.name,
                definitions.len()
            );
            emitter.add_site(&site.name, definitions, endpoint);
        }

        debug!("{} endpoints for {} sites", registry.len(), emitter.sites.len());
        Ok((emitter, registry.take_services()))
    }

    #[must_use]
    pub fn site(&self, id: SiteId) -> Option<&Site<T>> {
        self.sites.get(id.0)
    }

    #[must_use]
    pub fn site_id(&self, name: &str) -> Option<SiteId> {
        self.sites.iter().position(|s| s.name == name).map(SiteId)
    }

    pub fn site_ids(&self) -> impl Iterator<Item = SiteId> {
        (0..self.sites.len()).map(SiteId)
    }

    /// Evaluates the definitions of `site` tagged with `phase` and sends what
    /// they produce, in declaration order. A failing definition is logged and
    /// skipped.
    pub fn emit<C, R>(
        &mut self,
        site: SiteId,
        ctx: &C,
        resolver: &R,
        phase: Option<&str>,
        now: Instant,
    ) -> EmitReport
    where
        C: ?Sized,
        R: ValueResolver<C, Template = T> + ?Sized,
    {
        let mut report = EmitReport::default();
        let Some(site) = self.sites.get_mut(site.0) else {
            return report;
        };
        let Some(endpoint) = site.endpoint.as_ref() else {
            trace!("Site {} is off", site.name);
            return report;
        };

        let mut events = Vec::new();
        for definition in &mut site.definitions {
            if !definition.matches_phase(phase) {
                continue;
            }
            let percent = definition.sample_percent;
            if percent != 0 && self.rng.gen_range(0..100) >= percent {
                trace!("Sampled out {}", definition.name);
                report.declined += 1;
                continue;
            }
            match compile(definition, ctx, resolver, endpoint.splits_max(), now) {
                Ok(compiled) if compiled.is_empty() => report.declined += 1,
                Ok(compiled) => events.extend(compiled),
                Err(e) => {
                    debug!("Failed to compile {}: {}", definition.name, e);
                    report.failed += 1;
                }
            }
        }

        report.events = events.len();
        if !events.is_empty() {
            if let Err(e) = endpoint.send_batch(events) {
                warn!("Endpoint for site {} is gone: {}", site.name, e);
                return report;
            }
        }
        if let Err(e) = endpoint.flush_after_request() {
            warn!("Endpoint for site {} is gone: {}", site.name, e);
        }
        report
    }

    /// Sends an already built event, bypassing compilation and the phase and
    /// sampling gates.
    pub fn send_stat(&self, site: SiteId, event: MetricEvent) -> bool {
        let Some(endpoint) = self.site(site).and_then(|s| s.endpoint.as_ref()) else {
            return false;
        };
        endpoint.send_batch(vec![event]).is_ok()
    }

    /// Asks every endpoint to drain and stop.
    pub fn shutdown(&self) {
        for endpoint in self.sites.iter().filter_map(|s| s.endpoint.as_ref()) {
            // endpoints shared by several sites are already gone
            let _ = endpoint.shutdown();
        }
    }
}
