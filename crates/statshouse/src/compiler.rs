// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns one metric definition and one request into metric events.
//!
//! A split value template yields one event per item. A split dimension
//! spreads its items across events in order, creating events when it has
//! more items than the value produced.

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::constants::{MAX_DIMENSIONS, VALUE_FRACTION_DIGITS, VALUE_SCALE};
use crate::definition::MetricDefinition;
use crate::errors::CompileError;
use crate::metric::{MetricEvent, MetricKind, Sample};
use crate::split::{is_empty_dimension, split};
use crate::template::ValueResolver;

/// Parses an unsigned decimal integer. Signs and whitespace are rejected.
#[must_use]
pub fn parse_integer(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    s.bytes().try_fold(0i64, |acc, b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(i64::from(b - b'0'))
    })
}

/// Parses an unsigned decimal as an integer scaled by `10^point`. Digits
/// past `point` fractional places are validated and then ignored.
#[must_use]
pub fn parse_fixed_point(s: &str, point: u32) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    let mut remaining = point;
    let mut dot = false;
    for b in s.bytes() {
        if b == b'.' {
            if dot {
                return None;
            }
            dot = true;
            continue;
        }
        if !b.is_ascii_digit() {
            return None;
        }
        if remaining == 0 {
            continue;
        }
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        if dot {
            remaining -= 1;
        }
    }
    for _ in 0..remaining {
        value = value.checked_mul(10)?;
    }
    Some(value)
}

fn parse_sample(kind: MetricKind, item: &str) -> Result<Sample, CompileError> {
    if item.is_empty() {
        return Ok(Sample::zero(kind));
    }
    match kind {
        MetricKind::Counter => parse_integer(item)
            .map(|n| Sample::Counter(n as f64))
            .ok_or_else(|| CompileError::InvalidCounter(item.to_string())),
        MetricKind::Value => {
            let (negative, digits) = match item.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, item),
            };
            let scaled = parse_fixed_point(digits, VALUE_FRACTION_DIGITS)
                .ok_or_else(|| CompileError::InvalidValue(item.to_string()))?;
            let value = scaled as f64 / VALUE_SCALE;
            Ok(Sample::Value(if negative { -value } else { value }))
        }
        MetricKind::Unique => parse_integer(item)
            .map(Sample::Unique)
            .ok_or_else(|| CompileError::InvalidUnique(item.to_string())),
    }
}

/// Evaluates `definition` for one unit of work.
///
/// Returns at most `max` events, or none when the definition declines: rate
/// limited, a condition resolved to `""` or `"0"`, or an empty value.
/// Malformed numbers and resolver failures are errors.
pub fn compile<T, C, R>(
    definition: &mut MetricDefinition<T>,
    ctx: &C,
    resolver: &R,
    max: usize,
    now: Instant,
) -> Result<Vec<MetricEvent>, CompileError>
where
    C: ?Sized,
    R: ValueResolver<C, Template = T> + ?Sized,
{
    if !definition.min_interval.is_zero() {
        if let Some(last) = definition.last_emission {
            if now.saturating_duration_since(last) < definition.min_interval {
                trace!("Rate limited {}", definition.name);
                return Ok(Vec::new());
            }
        }
        definition.last_emission = Some(now);
    }

    for condition in &definition.conditions {
        let value = resolver.resolve(ctx, condition)?;
        if value.is_empty() || value == "0" {
            trace!("Condition declined {}", definition.name);
            return Ok(Vec::new());
        }
    }

    let raw = resolver.resolve(ctx, &definition.value.template)?;

    let mut keys: [Option<String>; MAX_DIMENSIONS] = std::array::from_fn(|_| None);
    for (key, dimension) in keys.iter_mut().zip(&definition.dimensions) {
        if let Some(dimension) = dimension.as_ref().filter(|d| !d.disabled) {
            *key = Some(resolver.resolve(ctx, &dimension.template)?);
        }
    }

    let kind = definition.value.kind;
    let name = definition.name;
    let mut events = Vec::new();
    let parsed = |item: &str| {
        parse_sample(kind, item).inspect_err(|e| debug!("Failed to parse {}: {}", name, e))
    };

    if definition.value.split {
        for item in split(&raw).take(max) {
            events.push(MetricEvent::new(name, parsed(item)?));
        }
    } else if !raw.is_empty() && max > 0 {
        events.push(MetricEvent::new(name, parsed(&raw)?));
    }

    if events.is_empty() {
        debug!("No values for {} in {:?}", name, raw);
        return Ok(events);
    }

    let shared = events[0].samples.clone();
    for (i, dimension) in definition.dimensions.iter().enumerate() {
        let (Some(dimension), Some(value)) = (dimension, keys[i].as_deref()) else {
            continue;
        };
        if is_empty_dimension(value) {
            continue;
        }

        if !dimension.split {
            for event in &mut events {
                event.push_dimension(dimension.name, value);
            }
            continue;
        }

        for (j, item) in split(value).take(max).enumerate() {
            if j >= events.len() {
                let mut event = MetricEvent::zero_sample(name, kind);
                if !definition.value.split {
                    event.samples = shared.clone();
                }
                for (previous, template) in definition.dimensions[..i].iter().enumerate() {
                    let Some(template) = template.as_ref().filter(|t| !t.split) else {
                        continue;
                    };
                    if let Some(value) = keys[previous].as_deref() {
                        if !is_empty_dimension(value) {
                            event.push_dimension(template.name, value);
                        }
                    }
                }
                events.push(event);
            }
            if !is_empty_dimension(item) {
                events[j].push_dimension(dimension.name, item);
            }
        }
    }

    trace!("Compiled {} events for {}", events.len(), name);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResolveError;
    use crate::metric::Samples;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Resolves a template by looking its text up as a variable name.
    struct Lookup;

    impl ValueResolver<HashMap<&'static str, &'static str>> for Lookup {
        type Template = &'static str;

        fn resolve(
            &self,
            ctx: &HashMap<&'static str, &'static str>,
            template: &&'static str,
        ) -> Result<String, ResolveError> {
            match template.strip_prefix('$') {
                Some(name) => ctx
                    .get(name)
                    .map(|v| v.to_string())
                    .ok_or_else(|| ResolveError::UnknownVariable(name.to_string())),
                None => Ok(template.to_string()),
            }
        }
    }

    fn run(
        definition: &mut MetricDefinition<&'static str>,
        pairs: &[(&'static str, &'static str)],
    ) -> Result<Vec<MetricEvent>, CompileError> {
        let ctx: HashMap<_, _> = pairs.iter().copied().collect();
        compile(definition, &ctx, &Lookup, 16, Instant::now())
    }

    fn values(events: &[MetricEvent]) -> Vec<f64> {
        events
            .iter()
            .map(|e| match &e.samples {
                Samples::Value(v) => v[0],
                Samples::Counter(c) => *c,
                Samples::Unique(u) => u[0] as f64,
            })
            .collect()
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("007"), Some(7));
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("-1"), None);
        assert_eq!(parse_integer("1.5"), None);
        assert_eq!(parse_integer(" 1"), None);
        assert_eq!(parse_integer("99999999999999999999"), None);
    }

    #[test]
    fn test_parse_fixed_point() {
        assert_eq!(parse_fixed_point("100", 8), Some(10_000_000_000));
        assert_eq!(parse_fixed_point("0.5", 8), Some(50_000_000));
        assert_eq!(parse_fixed_point("1.", 8), Some(100_000_000));
        assert_eq!(parse_fixed_point(".25", 2), Some(25));
        // digits past the precision are dropped
        assert_eq!(parse_fixed_point("0.123456789", 8), Some(12_345_678));
        assert_eq!(parse_fixed_point("1.2.3", 8), None);
        assert_eq!(parse_fixed_point("1e3", 8), None);
        assert_eq!(parse_fixed_point("", 8), None);
    }

    #[test]
    fn test_single_value() {
        let mut definition = MetricDefinition::new("latency", MetricKind::Value, "$t");
        let events = run(&mut definition, &[("t", "0.250")]).unwrap();
        assert_eq!(events, vec![MetricEvent::value("latency", 0.25)]);

        let events = run(&mut definition, &[("t", "-1.5")]).unwrap();
        assert_eq!(values(&events), vec![-1.5]);
    }

    #[test]
    fn test_split_value_with_shared_dimension() {
        let mut definition = MetricDefinition::new("api_latency", MetricKind::Value, "$times")
            .split_value()
            .with_dimension(0, "$status", false);
        let events = run(&mut definition, &[("times", "1,2,3"), ("status", "200")]).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(values(&events), vec![1.0, 2.0, 3.0]);
        for event in &events {
            assert_eq!(event.dimensions.len(), 1);
            assert_eq!(event.dimension("0"), Some("200"));
        }
    }

    #[test]
    fn test_empty_items_become_zero_samples() {
        let mut definition =
            MetricDefinition::new("hits", MetricKind::Counter, "$v").split_value();
        let events = run(&mut definition, &[("v", "3,-,,4")]).unwrap();
        assert_eq!(values(&events), vec![3.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_declines() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "$v");
        assert!(run(&mut definition, &[("v", "")]).unwrap().is_empty());

        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "1")
            .with_condition("$cached");
        assert!(run(&mut definition, &[("cached", "0")]).unwrap().is_empty());
        assert!(run(&mut definition, &[("cached", "")]).unwrap().is_empty());
        assert_eq!(run(&mut definition, &[("cached", "1")]).unwrap().len(), 1);

        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "$v").split_value();
        assert!(run(&mut definition, &[("v", " , ")]).unwrap().is_empty());
    }

    #[test]
    fn test_rate_limit() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "1")
            .with_min_interval(Duration::from_secs(10));
        let ctx: HashMap<&'static str, &'static str> = HashMap::new();
        let start = Instant::now();

        assert_eq!(compile(&mut definition, &ctx, &Lookup, 16, start).unwrap().len(), 1);
        let soon = start + Duration::from_secs(9);
        assert!(compile(&mut definition, &ctx, &Lookup, 16, soon).unwrap().is_empty());
        let later = start + Duration::from_secs(10);
        assert_eq!(compile(&mut definition, &ctx, &Lookup, 16, later).unwrap().len(), 1);
        assert_eq!(definition.last_emission, Some(later));
    }

    #[test]
    fn test_malformed_numbers() {
        let mut counter = MetricDefinition::new("hits", MetricKind::Counter, "$v");
        assert_eq!(
            run(&mut counter, &[("v", "1.5")]),
            Err(CompileError::InvalidCounter("1.5".to_string()))
        );
        let mut value = MetricDefinition::new("t", MetricKind::Value, "$v");
        assert_eq!(
            run(&mut value, &[("v", "fast")]),
            Err(CompileError::InvalidValue("fast".to_string()))
        );
        let mut unique = MetricDefinition::new("u", MetricKind::Unique, "$v").split_value();
        assert_eq!(
            run(&mut unique, &[("v", "1,x")]),
            Err(CompileError::InvalidUnique("x".to_string()))
        );
    }

    #[test]
    fn test_resolver_errors_propagate() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "$missing");
        assert_eq!(
            run(&mut definition, &[]),
            Err(CompileError::Resolve(ResolveError::UnknownVariable(
                "missing".to_string()
            )))
        );
    }

    #[test]
    fn test_empty_dimensions_are_skipped() {
        for empty in ["", "0", "-"] {
            let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "1")
                .with_dimension(0, "$k", false)
                .with_dimension(1, "$k", true);
            let events = run(&mut definition, &[("k", empty)]).unwrap();
            assert_eq!(events.len(), 1);
            assert!(events[0].dimensions.is_empty());
        }
    }

    #[test]
    fn test_split_dimension_synthesizes_events() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "$v")
            .with_dimension(0, "$method", false)
            .with_dimension(1, "$codes", true)
            .with_dimension(2, "$host", false);
        let events = run(
            &mut definition,
            &[("v", "5"), ("method", "GET"), ("codes", "200,502,504"), ("host", "a")],
        )
        .unwrap();

        assert_eq!(events.len(), 3);
        // value not split: every event shares the resolved sample
        assert_eq!(values(&events), vec![5.0, 5.0, 5.0]);
        for (event, code) in events.iter().zip(["200", "502", "504"]) {
            assert_eq!(event.dimension("0"), Some("GET"));
            assert_eq!(event.dimension("1"), Some(code));
            assert_eq!(event.dimension("2"), Some("a"));
        }
        let keys: Vec<&str> = events[2].dimensions.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_zero_and_dash_split_items_keep_position_without_dimension() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "1")
            .with_dimension(0, "$codes", true);
        let events = run(&mut definition, &[("codes", "200, 0, -, 504")]).unwrap();

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].dimension("0"), Some("200"));
        assert!(events[1].dimensions.is_empty());
        assert!(events[2].dimensions.is_empty());
        assert_eq!(events[3].dimension("0"), Some("504"));
    }

    #[test]
    fn test_split_dimension_with_split_value() {
        let mut definition = MetricDefinition::new("t", MetricKind::Value, "$times")
            .split_value()
            .with_dimension(0, "$upstreams", true);
        let events = run(
            &mut definition,
            &[("times", "0.5"), ("upstreams", "10.0.0.1:80, 10.0.0.2:80 : 10.0.0.3:80")],
        )
        .unwrap();
        assert_eq!(events.len(), 3);
        // synthesized events get a zero sample when the value was split
        assert_eq!(values(&events), vec![0.5, 0.0, 0.0]);
        assert_eq!(events[0].dimension("0"), Some("10.0.0.1:80"));
        assert_eq!(events[1].dimension("0"), Some("10.0.0.2:80"));
        assert_eq!(events[2].dimension("0"), Some("10.0.0.3:80"));
    }

    #[test]
    fn test_event_count_is_capped() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "$v")
            .split_value()
            .with_dimension(0, "$k", true);
        let ctx: HashMap<_, _> = [("v", "1,2,3"), ("k", "a,b,c,d,e")].into_iter().collect();
        let events = compile(&mut definition, &ctx, &Lookup, 4, Instant::now()).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].dimension("0"), Some("d"));
    }

    #[test]
    fn test_disabled_dimension_is_ignored() {
        let mut definition = MetricDefinition::new("hits", MetricKind::Counter, "1")
            .with_dimension(0, "$missing", false);
        if let Some(dimension) = definition.dimensions[0].as_mut() {
            dimension.disabled = true;
        }
        let events = run(&mut definition, &[]).unwrap();
        assert!(events[0].dimensions.is_empty());
    }
}
