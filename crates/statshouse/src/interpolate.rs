// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A small `$variable` template language, enough to drive the pipeline from
//! plain key/value request data.
//!
//! `"$status"` and `"${status}ms"` reference variables, any other text is
//! copied as is. A `$` not followed by a variable name is literal.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

use crate::errors::ResolveError;
use crate::template::{TemplateCompiler, ValueResolver};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpolation {
    segments: Vec<Segment>,
}

/// Request data a template can read from.
pub trait Variables {
    fn variable(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl<S: BuildHasher> Variables for HashMap<String, String, S> {
    fn variable(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }
}

impl Variables for serde_json::Map<String, serde_json::Value> {
    fn variable(&self, name: &str) -> Option<Cow<'_, str>> {
        match self.get(name)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl Interpolation {
    pub fn parse(src: &str) -> Result<Self, ResolveError> {
        let bytes = src.as_bytes();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut at = 0;

        while at < bytes.len() {
            let Some(offset) = src[at..].find('$') else {
                literal.push_str(&src[at..]);
                break;
            };
            literal.push_str(&src[at..at + offset]);
            at += offset + 1;

            let name = if bytes.get(at) == Some(&b'{') {
                let close = src[at..]
                    .find('}')
                    .ok_or_else(|| ResolveError::Unterminated(src.to_string()))?;
                let name = &src[at + 1..at + close];
                at += close + 1;
                name
            } else {
                let len = bytes[at..].iter().take_while(|b| is_name_byte(**b)).count();
                let name = &src[at..at + len];
                at += len;
                name
            };

            if name.is_empty() {
                literal.push('$');
                continue;
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(name.to_string()));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Interpolation { segments })
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders against `vars`. Unknown variables render empty unless
    /// `strict` is set.
    pub fn render<V: Variables + ?Sized>(
        &self,
        vars: &V,
        strict: bool,
    ) -> Result<String, ResolveError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => match vars.variable(name) {
                    Some(value) => out.push_str(&value),
                    None if strict => return Err(ResolveError::UnknownVariable(name.clone())),
                    None => {}
                },
            }
        }
        Ok(out)
    }
}

/// [`TemplateCompiler`] and [`ValueResolver`] for [`Interpolation`].
#[derive(Clone, Debug, Default)]
pub struct Interpolator {
    known: Option<HashSet<String>>,
    strict: bool,
}

impl Interpolator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts `exists` guards to the given variable names.
    #[must_use]
    pub fn with_known<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl TemplateCompiler for Interpolator {
    type Template = Interpolation;

    fn compile(&self, source: &str) -> Result<Interpolation, ResolveError> {
        Interpolation::parse(source)
    }

    fn exists(&self, variable: &str) -> bool {
        let name = variable.trim_start_matches('$');
        match &self.known {
            Some(known) => known.contains(name),
            None => !name.is_empty(),
        }
    }
}

impl<C: Variables + ?Sized> ValueResolver<C> for Interpolator {
    type Template = Interpolation;

    fn resolve(&self, ctx: &C, template: &Interpolation) -> Result<String, ResolveError> {
        template.render(ctx, self.strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_and_render() {
        let template = Interpolation::parse("$status,${upstream}ms").unwrap();
        assert_eq!(template.variables().collect::<Vec<_>>(), vec!["status", "upstream"]);
        let ctx = vars(&[("status", "200"), ("upstream", "15")]);
        assert_eq!(template.render(&ctx, false).unwrap(), "200,15ms");
    }

    #[test]
    fn test_literal_dollar() {
        let template = Interpolation::parse("cost $ 5 $").unwrap();
        assert_eq!(template.variables().count(), 0);
        assert_eq!(template.render(&vars(&[]), true).unwrap(), "cost $ 5 $");
    }

    #[test]
    fn test_unterminated_brace() {
        assert_eq!(
            Interpolation::parse("${status"),
            Err(ResolveError::Unterminated("${status".to_string()))
        );
    }

    #[test]
    fn test_unknown_variables() {
        let template = Interpolation::parse("a$missing").unwrap();
        assert_eq!(template.render(&vars(&[]), false).unwrap(), "a");
        assert_eq!(
            template.render(&vars(&[]), true),
            Err(ResolveError::UnknownVariable("missing".to_string()))
        );
    }

    #[test]
    fn test_json_variables() {
        let ctx: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"status": 404, "method": "GET", "gone": null}"#).unwrap();
        let template = Interpolation::parse("$method $status$gone").unwrap();
        assert_eq!(template.render(&ctx, true).unwrap_err(), ResolveError::UnknownVariable("gone".into()));
        assert_eq!(template.render(&ctx, false).unwrap(), "GET 404");
    }

    #[test]
    fn test_interpolator_traits() {
        let interpolator = Interpolator::new().with_known(["status"]);
        assert!(interpolator.exists("$status"));
        assert!(!interpolator.exists("$upstream_status"));
        assert!(Interpolator::new().exists("anything"));

        let template = interpolator.compile("$status").unwrap();
        let ctx = vars(&[("status", "500")]);
        assert_eq!(interpolator.resolve(&ctx, &template).unwrap(), "500");
    }
}
