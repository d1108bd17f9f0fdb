// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use statshouse::{
    config::PipelineConfig,
    emitter::{EmitReport, Emitter},
    interpolate::{Interpolation, Interpolator},
};

type Variables = serde_json::Map<String, serde_json::Value>;

/// One completed unit of work, read as a JSON line from stdin.
#[derive(Debug, Deserialize)]
struct Trigger {
    /// Restricts the trigger to one site; all sites when absent
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    vars: Variables,
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("STATSHOUSE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let Some(config_path) = env::var("STATSHOUSE_CONFIG")
        .ok()
        .or_else(|| env::args().nth(1))
    else {
        error!("No configuration given, set STATSHOUSE_CONFIG or pass a path");
        return;
    };

    let config = match PipelineConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration from {config_path}: {e}");
            return;
        }
    };

    let resolver = Interpolator::new();
    let (mut emitter, services) = match Emitter::<Interpolation>::from_config(&config, &resolver)
    {
        Ok(built) => built,
        Err(e) => {
            error!("Error creating metric pipeline: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    let tasks: Vec<_> = services
        .into_iter()
        .map(|service| tokio::spawn(service.with_cancel_token(cancel_token.clone()).run()))
        .collect();
    info!(
        "statshouse-emit: {} sites, {} endpoints",
        config.sites.len(),
        tasks.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut total = EmitReport::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Error reading stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let trigger: Trigger = match serde_json::from_str(&line) {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!("Skipping malformed trigger: {e}");
                continue;
            }
        };
        emit(&mut emitter, &resolver, &trigger, &mut total);
    }

    info!(
        "Emitted {} events, {} declined, {} failed",
        total.events, total.declined, total.failed
    );
    cancel_token.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Endpoint service failed: {e}");
        }
    }
}

fn emit(
    emitter: &mut Emitter<Interpolation>,
    resolver: &Interpolator,
    trigger: &Trigger,
    total: &mut EmitReport,
) {
    let sites: Vec<_> = match trigger.site.as_deref() {
        Some(name) => match emitter.site_id(name) {
            Some(id) => vec![id],
            None => {
                warn!("Unknown site {name}");
                return;
            }
        },
        None => emitter.site_ids().collect(),
    };

    let now = Instant::now();
    for site in sites {
        let report = emitter.emit(site, &trigger.vars, resolver, trigger.phase.as_deref(), now);
        debug!("{site}: {report:?}");
        total.events += report.events;
        total.declined += report.declined;
        total.failed += report.failed;
    }
}
